use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;

use agentflow_core::domain::message::{MessageKind, MessageRole};
use agentflow_core::flows::WorkflowStatus;

use crate::llm::{ChatChunk, ChatClient, ChatMessage, ChatRequest};
use crate::prompts;
use crate::transport::StreamEvent;
use crate::workflow::bus::StageHandler;
use crate::workflow::context::WorkflowContext;
use crate::workflow::emit::Emitter;
use crate::workflow::history::HistoryAssembler;
use crate::workflow::ledger::TaskLedger;
use crate::workflow::StageError;

/// Streams the final answer built from every sub-task result. A failure is
/// reported to the user and leaves the turn where it is.
pub struct SummarizeHandler {
    chat: Arc<dyn ChatClient>,
    history: Arc<HistoryAssembler>,
    ledger: Arc<TaskLedger>,
    emitter: Emitter,
}

impl SummarizeHandler {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        history: Arc<HistoryAssembler>,
        ledger: Arc<TaskLedger>,
        emitter: Emitter,
    ) -> Self {
        Self { chat, history, ledger, emitter }
    }

    async fn stream_answer(&self, ctx: &WorkflowContext) -> Result<String> {
        let mut messages =
            self.history.assemble(&ctx.session_id, ctx.agent.system_prompt.as_deref()).await?;
        messages.push(ChatMessage::user(prompts::summarize(&ctx.goal(), ctx.sub_task_results())));

        let mut chunks =
            self.chat.stream(ChatRequest::new(messages).with_model(ctx.model.clone())).await?;
        let mut answer = String::new();
        while let Some(chunk) = chunks.next().await {
            match chunk? {
                ChatChunk::Text(text) => {
                    answer.push_str(&text);
                    self.emitter.send(ctx, StreamEvent::text(text)).await;
                }
                ChatChunk::Thinking(text) => {
                    self.emitter.send(ctx, StreamEvent::thinking(text)).await;
                }
                ChatChunk::Finished(response) => {
                    if answer.is_empty() && !response.content.is_empty() {
                        self.emitter.send(ctx, StreamEvent::text(response.content.clone())).await;
                        answer = response.content;
                    }
                    tracing::debug!(
                        event_name = "workflow.summarize.usage",
                        turn_id = %ctx.turn_id,
                        prompt_tokens = response.usage.prompt,
                        completion_tokens = response.usage.completion,
                        "summary stream finished"
                    );
                    break;
                }
            }
        }

        Ok(answer)
    }
}

#[async_trait]
impl StageHandler for SummarizeHandler {
    fn stage(&self) -> WorkflowStatus {
        WorkflowStatus::Summarize
    }

    async fn process_event(&self, ctx: &mut WorkflowContext) -> Result<(), StageError> {
        let answer = match self.stream_answer(ctx).await {
            Ok(answer) => answer,
            Err(error) => {
                let message = format!("Failed to summarize the results: {error:#}");
                tracing::error!(
                    event_name = "workflow.summarize.failed",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    error = %message,
                    "summary failed; turn left in SUMMARIZE"
                );
                ctx.set_summary_error(message.clone());
                self.emitter.fail(ctx, &message).await;
                return Ok(());
            }
        };

        if let Err(error) = self
            .history
            .record(&ctx.session_id, MessageRole::Assistant, MessageKind::Summary, &answer)
            .await
        {
            tracing::warn!(
                event_name = "workflow.summarize.persist_failed",
                turn_id = %ctx.turn_id,
                session_id = %ctx.session_id,
                error = %error,
                "could not store final answer"
            );
        }
        let completed = self.ledger.complete_task(ctx.parent_task_mut(), answer).await;
        self.emitter.end(ctx, StreamEvent::text("")).await;
        completed?;

        tracing::info!(
            event_name = "workflow.summarize.completed",
            turn_id = %ctx.turn_id,
            session_id = %ctx.session_id,
            "final answer delivered"
        );
        Ok(())
    }

    fn transition_to(&self, ctx: &WorkflowContext) -> Option<WorkflowStatus> {
        match ctx.summary_error() {
            Some(_) => None,
            None => Some(WorkflowStatus::Completed),
        }
    }
}
