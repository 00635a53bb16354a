use std::sync::Arc;

use async_trait::async_trait;

use agentflow_core::tokens::{EstimatingCounter, TokenCounter};

use super::{
    sort_chronologically, total_tokens, OverflowError, TokenMessage, TokenOverflowStrategy,
    TokenProcessResult,
};
use crate::llm::{ChatClient, ChatMessage, ChatRequest};
use crate::prompts::SUMMARY_STRATEGY_INSTRUCTION;

/// Keeps the `summary_threshold` most recent messages and replaces the rest
/// with one model-written summary.
pub struct SummarizeStrategy {
    client: Arc<dyn ChatClient>,
    summary_threshold: usize,
    model: Option<String>,
}

impl SummarizeStrategy {
    pub fn new(
        client: Arc<dyn ChatClient>,
        summary_threshold: usize,
        model: Option<String>,
    ) -> Self {
        Self { client, summary_threshold, model }
    }

    fn request(&self, older: &[TokenMessage]) -> ChatRequest {
        let transcript = older
            .iter()
            .map(|message| format!("{}: {}", message.role.as_str(), message.content))
            .collect::<Vec<_>>()
            .join("\n");
        let request = ChatRequest::new(vec![
            ChatMessage::system(SUMMARY_STRATEGY_INSTRUCTION),
            ChatMessage::user(transcript),
        ]);
        match &self.model {
            Some(model) => request.with_model(model.clone()),
            None => request,
        }
    }
}

#[async_trait]
impl TokenOverflowStrategy for SummarizeStrategy {
    fn name(&self) -> &'static str {
        "summarize"
    }

    fn need_processing(&self, messages: &[TokenMessage]) -> bool {
        messages.len() > self.summary_threshold
    }

    async fn process(
        &self,
        mut messages: Vec<TokenMessage>,
    ) -> Result<TokenProcessResult, OverflowError> {
        if !self.need_processing(&messages) {
            return Ok(TokenProcessResult::unchanged(messages, self.name()));
        }

        sort_chronologically(&mut messages);
        let retained = messages.split_off(messages.len() - self.summary_threshold);
        let older = messages;

        let response = self
            .client
            .complete(self.request(&older))
            .await
            .map_err(|error| OverflowError::Summarization(error.to_string()))?;
        let summary = response.content.trim().to_string();
        if summary.is_empty() {
            return Err(OverflowError::EmptySummary);
        }

        let total = total_tokens(&retained).saturating_add(EstimatingCounter.count(&summary));
        tracing::debug!(
            event_name = "overflow.summarize.applied",
            summarized = older.len(),
            retained = retained.len(),
            total_tokens = total,
            "older messages replaced by a summary"
        );

        Ok(TokenProcessResult {
            retained_messages: retained,
            summary: Some(summary),
            total_tokens: total,
            strategy_name: self.name(),
            processed: true,
        })
    }
}
