use std::sync::Arc;

use agentflow_core::domain::task::TaskRecord;

use crate::tools::{summarize_calls, ToolCall};
use crate::transport::{MessageType, StreamEvent, Transport, TransportError};
use crate::workflow::context::WorkflowContext;

/// Sends workflow output to the turn's connection. Transport failures are
/// logged and dropped; the workflow keeps running without a listener.
#[derive(Clone)]
pub struct Emitter {
    transport: Arc<dyn Transport>,
}

impl Emitter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn send(&self, ctx: &WorkflowContext, event: StreamEvent) {
        let result = self.transport.send_message(ctx.connection(), event).await;
        log_failure(ctx, "send_message", result);
    }

    /// Final event of the connection.
    pub async fn end(&self, ctx: &WorkflowContext, event: StreamEvent) {
        let result = self.transport.send_end_message(ctx.connection(), event).await;
        log_failure(ctx, "send_end_message", result);
    }

    /// Reports a turn-ending error and closes the connection.
    pub async fn fail(&self, ctx: &mut WorkflowContext, message: &str) {
        let result = self.transport.handle_error(ctx.connection(), message).await;
        log_failure(ctx, "handle_error", result);
        ctx.mark_error_reported();
    }

    /// Inline error; the connection stays open.
    pub async fn error(&self, ctx: &WorkflowContext, task: Option<&TaskRecord>, message: &str) {
        let mut event = StreamEvent::error(message);
        if let Some(task) = task {
            event = event.with_task(task.id.clone());
        }
        self.send(ctx, event).await;
    }

    pub async fn plan(&self, ctx: &WorkflowContext) {
        let listing = ctx
            .tasks()
            .iter()
            .enumerate()
            .map(|(index, name)| format!("{}. {name}", index + 1))
            .collect::<Vec<_>>()
            .join("\n");
        let content = format!("Planned {} sub-tasks:\n{listing}", ctx.tasks().len());
        self.send(ctx, StreamEvent::new(MessageType::TaskStatusLoading, content)).await;
    }

    pub async fn task_started(&self, ctx: &WorkflowContext, task: &TaskRecord) {
        let event = StreamEvent::new(MessageType::TaskStarted, task.name.clone())
            .with_task(task.id.clone());
        self.send(ctx, event).await;
    }

    pub async fn task_finished(&self, ctx: &WorkflowContext, task: &TaskRecord, result: &str) {
        let event = StreamEvent::new(MessageType::TaskStatusFinished, result)
            .with_task(task.id.clone());
        self.send(ctx, event).await;
    }

    pub async fn tool_calls(&self, ctx: &WorkflowContext, task: &TaskRecord, calls: &[ToolCall]) {
        if let Some(summary) = summarize_calls(calls) {
            let event = StreamEvent::new(MessageType::ToolCall, summary).with_task(task.id.clone());
            self.send(ctx, event).await;
        }
    }
}

fn log_failure(ctx: &WorkflowContext, operation: &'static str, result: Result<(), TransportError>) {
    if let Err(error) = result {
        tracing::warn!(
            event_name = "workflow.emit.failed",
            turn_id = %ctx.turn_id,
            session_id = %ctx.session_id,
            connection = %ctx.connection(),
            operation,
            error = %error,
            "transport rejected workflow output"
        );
    }
}
