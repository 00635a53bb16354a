//! Token-overflow strategies: decide which prior messages survive before a
//! model call under a fixed token budget.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use agentflow_core::config::{OverflowStrategyKind, TokenOverflowConfig};
use agentflow_core::domain::message::{MessageRole, SessionMessage};

use crate::llm::ChatClient;

mod none;
mod sliding_window;
mod summarize;

pub use none::NoneStrategy;
pub use sliding_window::SlidingWindowStrategy;
pub use summarize::SummarizeStrategy;

/// The unit operated on by overflow strategies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenMessage {
    pub id: String,
    pub content: String,
    pub role: MessageRole,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&SessionMessage> for TokenMessage {
    fn from(message: &SessionMessage) -> Self {
        Self {
            id: message.id.0.clone(),
            content: message.content.clone(),
            role: message.role,
            token_count: message.token_count,
            created_at: message.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenProcessResult {
    pub retained_messages: Vec<TokenMessage>,
    pub summary: Option<String>,
    pub total_tokens: u32,
    pub strategy_name: &'static str,
    /// `false` when nothing had to be done.
    pub processed: bool,
}

impl TokenProcessResult {
    pub fn unchanged(messages: Vec<TokenMessage>, strategy_name: &'static str) -> Self {
        let total_tokens = total_tokens(&messages);
        Self {
            retained_messages: messages,
            summary: None,
            total_tokens,
            strategy_name,
            processed: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum OverflowError {
    #[error("summarization call failed: {0}")]
    Summarization(String),
    #[error("summarization returned an empty summary")]
    EmptySummary,
}

#[async_trait]
pub trait TokenOverflowStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn need_processing(&self, messages: &[TokenMessage]) -> bool;

    async fn process(
        &self,
        messages: Vec<TokenMessage>,
    ) -> Result<TokenProcessResult, OverflowError>;
}

pub fn total_tokens(messages: &[TokenMessage]) -> u32 {
    messages.iter().fold(0u32, |sum, message| sum.saturating_add(message.token_count))
}

/// Exact sum without saturation, for arithmetic that subtracts counts back out.
pub(crate) fn total_tokens_wide(messages: &[TokenMessage]) -> u64 {
    messages.iter().map(|message| u64::from(message.token_count)).sum()
}

/// Oldest first; equal timestamps keep their input order.
pub(crate) fn sort_chronologically(messages: &mut [TokenMessage]) {
    messages.sort_by(|left, right| left.created_at.cmp(&right.created_at));
}

/// Builds the configured strategy. `Summarize` needs a chat client; without
/// one the factory degrades to `None`.
pub fn create_strategy(
    config: &TokenOverflowConfig,
    summarizer: Option<Arc<dyn ChatClient>>,
) -> Arc<dyn TokenOverflowStrategy> {
    let strategy: Arc<dyn TokenOverflowStrategy> = match config.strategy {
        OverflowStrategyKind::None => Arc::new(NoneStrategy),
        OverflowStrategyKind::SlidingWindow => {
            Arc::new(SlidingWindowStrategy::new(config.max_tokens, config.reserve_ratio))
        }
        OverflowStrategyKind::Summarize => match summarizer {
            Some(client) => Arc::new(SummarizeStrategy::new(
                client,
                config.summary_threshold,
                config.summary_model.clone(),
            )),
            None => {
                tracing::warn!(
                    event_name = "overflow.strategy.fallback",
                    requested = "summarize",
                    "no chat client available for summarization; using none"
                );
                Arc::new(NoneStrategy)
            }
        },
    };

    tracing::debug!(
        event_name = "overflow.strategy.selected",
        strategy = strategy.name(),
        max_tokens = config.max_tokens,
        "token overflow strategy selected"
    );
    strategy
}


#[cfg(test)]
mod tests {
    use agentflow_core::config::{OverflowStrategyKind, TokenOverflowConfig};

    use super::create_strategy;

    #[test]
    fn factory_selects_by_kind_and_degrades_without_client() {
        let mut config = TokenOverflowConfig::default();
        assert_eq!(create_strategy(&config, None).name(), "none");

        config.strategy = OverflowStrategyKind::SlidingWindow;
        assert_eq!(create_strategy(&config, None).name(), "sliding_window");

        config.strategy = OverflowStrategyKind::Summarize;
        assert_eq!(create_strategy(&config, None).name(), "none");

        config.strategy = OverflowStrategyKind::from_selector("mystery");
        assert_eq!(create_strategy(&config, None).name(), "none");
    }
}
