use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use agentflow_core::config::LlmConfig;
use agentflow_core::domain::message::MessageRole;

use crate::tools::{ToolCall, ToolDefinition};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl From<MessageRole> for ChatRole {
    fn from(value: MessageRole) -> Self {
        match value {
            MessageRole::System => Self::System,
            MessageRole::User => Self::User,
            MessageRole::Assistant => Self::Assistant,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Set on `Tool` messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), tool_call_id: None }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: ChatRole::Tool, content: content.into(), tool_call_id: Some(call_id.into()) }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatRequest {
    /// Model override; the client's default applies when `None`.
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { model: None, messages, tools: Vec::new() }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub thinking: Option<String>,
    pub usage: TokenUsage,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), ..Self::default() }
    }

    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One increment of a streamed completion. `Finished` is always last.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatChunk {
    Text(String),
    Thinking(String),
    Finished(ChatResponse),
}

pub type ChatStream = BoxStream<'static, Result<ChatChunk>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Streams the completion. Clients without native streaming fall back to
    /// one text chunk followed by the finished response.
    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let response = self.complete(request).await?;
        let chunks = vec![
            Ok(ChatChunk::Text(response.content.clone())),
            Ok(ChatChunk::Finished(response)),
        ];
        Ok(stream::iter(chunks).boxed())
    }
}

/// Drains a stream into a single response. Text and thinking chunks are
/// concatenated when the final response leaves them empty.
pub async fn collect_stream(mut chunks: ChatStream) -> Result<ChatResponse> {
    let mut content = String::new();
    let mut thinking = String::new();

    while let Some(chunk) = chunks.next().await {
        match chunk? {
            ChatChunk::Text(text) => content.push_str(&text),
            ChatChunk::Thinking(text) => thinking.push_str(&text),
            ChatChunk::Finished(mut response) => {
                if response.content.is_empty() {
                    response.content = content;
                }
                if response.thinking.is_none() && !thinking.is_empty() {
                    response.thinking = Some(thinking);
                }
                return Ok(response);
            }
        }
    }

    if content.is_empty() && thinking.is_empty() {
        return Err(anyhow!("chat stream ended without any output"));
    }

    Ok(ChatResponse {
        content,
        thinking: (!thinking.is_empty()).then_some(thinking),
        ..ChatResponse::default()
    })
}

/// Applies the configured per-call timeout and retry budget to another
/// client. A call is attempted `max_retries + 1` times; each retry waits
/// `retry_delay * attempt` first. Streams are retried only while opening.
pub struct RetryingChatClient {
    inner: Arc<dyn ChatClient>,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl RetryingChatClient {
    pub fn new(inner: Arc<dyn ChatClient>, timeout: Duration, max_retries: u32) -> Self {
        Self { inner, timeout, max_retries, retry_delay: Duration::from_millis(250) }
    }

    pub fn from_config(inner: Arc<dyn ChatClient>, config: &LlmConfig) -> Self {
        Self::new(inner, Duration::from_secs(config.timeout_secs), config.max_retries)
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    async fn attempt<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            let error = match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => error,
                Err(_) => anyhow!("chat {operation} timed out after {:?}", self.timeout),
            };
            tracing::warn!(
                event_name = "llm.call.failed",
                operation,
                attempt,
                max_retries = self.max_retries,
                error = %error,
                "chat call failed"
            );
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| anyhow!("chat {operation} was never attempted")))
    }
}

#[async_trait]
impl ChatClient for RetryingChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.attempt("complete", || self.inner.complete(request.clone())).await
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        self.attempt("stream", || self.inner.stream(request.clone())).await
    }
}
