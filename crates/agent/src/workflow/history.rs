use std::sync::Arc;

use agentflow_core::domain::message::{MessageKind, MessageRole, SessionMessage};
use agentflow_core::domain::session::SessionId;
use agentflow_core::tokens::{EstimatingCounter, TokenCounter};
use agentflow_db::repositories::{MessageRepository, RepositoryError};

use crate::llm::{ChatMessage, ChatRole};
use crate::overflow::{TokenMessage, TokenOverflowStrategy, TokenProcessResult};

/// Reads and writes session history and bounds it with the configured
/// overflow strategy before a model call.
pub struct HistoryAssembler {
    messages: Arc<dyn MessageRepository>,
    strategy: Arc<dyn TokenOverflowStrategy>,
    counter: EstimatingCounter,
}

impl HistoryAssembler {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        strategy: Arc<dyn TokenOverflowStrategy>,
    ) -> Self {
        Self { messages, strategy, counter: EstimatingCounter }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub async fn record(
        &self,
        session_id: &SessionId,
        role: MessageRole,
        kind: MessageKind,
        content: &str,
    ) -> Result<SessionMessage, RepositoryError> {
        let message = SessionMessage::new(
            session_id.clone(),
            role,
            kind,
            content,
            self.counter.count(content),
        );
        self.messages.append(message.clone()).await?;
        Ok(message)
    }

    /// Chat messages for the session: the agent prompt, then the strategy's
    /// summary (if any), then the retained history. A failing strategy falls
    /// back to the full history.
    pub async fn assemble(
        &self,
        session_id: &SessionId,
        system_prompt: Option<&str>,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let history = self.messages.list_for_session(session_id).await?;
        let tokens: Vec<TokenMessage> = history.iter().map(TokenMessage::from).collect();

        let processed = match self.strategy.process(tokens.clone()).await {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(
                    event_name = "workflow.history.overflow_failed",
                    session_id = %session_id,
                    strategy = self.strategy.name(),
                    error = %error,
                    "overflow strategy failed; sending full history"
                );
                TokenProcessResult::unchanged(tokens, self.strategy.name())
            }
        };

        if processed.processed {
            tracing::info!(
                event_name = "workflow.history.trimmed",
                session_id = %session_id,
                strategy = processed.strategy_name,
                original = history.len(),
                retained = processed.retained_messages.len(),
                total_tokens = processed.total_tokens,
                "history bounded before model call"
            );
        }

        let mut chat = Vec::with_capacity(processed.retained_messages.len() + 2);
        if let Some(prompt) = system_prompt.filter(|prompt| !prompt.trim().is_empty()) {
            chat.push(ChatMessage::system(prompt));
        }
        if let Some(summary) = processed.summary {
            chat.push(ChatMessage::system(format!("Summary of the earlier conversation:\n{summary}")));
        }
        chat.extend(
            processed
                .retained_messages
                .into_iter()
                .map(|message| ChatMessage::new(ChatRole::from(message.role), message.content)),
        );
        Ok(chat)
    }
}
