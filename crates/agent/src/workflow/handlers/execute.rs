use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use agentflow_core::config::ProgressMode;
use agentflow_core::domain::task::TaskRecord;
use agentflow_core::flows::WorkflowStatus;

use crate::llm::{ChatClient, ChatMessage, ChatRequest};
use crate::prompts;
use crate::tools::ToolRegistry;
use crate::workflow::bus::StageHandler;
use crate::workflow::context::WorkflowContext;
use crate::workflow::emit::Emitter;
use crate::workflow::ledger::TaskLedger;
use crate::workflow::StageError;

/// Upper bound on model round-trips that only request more tool calls.
pub const MAX_TOOL_ROUNDS: usize = 8;

/// Runs the sub-tasks one after another. A failing sub-task is recorded and
/// reported inline; the loop moves on to the next one.
pub struct TaskExecuteHandler {
    chat: Arc<dyn ChatClient>,
    tools: Arc<ToolRegistry>,
    ledger: Arc<TaskLedger>,
    emitter: Emitter,
    progress_mode: ProgressMode,
}

impl TaskExecuteHandler {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        tools: Arc<ToolRegistry>,
        ledger: Arc<TaskLedger>,
        emitter: Emitter,
        progress_mode: ProgressMode,
    ) -> Self {
        Self { chat, tools, ledger, emitter, progress_mode }
    }

    async fn run(&self, ctx: &WorkflowContext, task: &TaskRecord) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(prompt) = ctx.agent.system_prompt.as_deref() {
            messages.push(ChatMessage::system(prompt));
        }
        messages.push(ChatMessage::user(prompts::task_execute(
            &ctx.goal(),
            &task.name,
            ctx.sub_task_results(),
        )));
        let definitions = self.tools.definitions();

        let mut rounds = 0usize;
        loop {
            let request = ChatRequest::new(messages.clone())
                .with_model(ctx.model.clone())
                .with_tools(definitions.clone());
            let response = self.chat.complete(request).await?;
            if !response.requests_tools() {
                return Ok(response.content);
            }
            if rounds == MAX_TOOL_ROUNDS {
                bail!("gave up after {MAX_TOOL_ROUNDS} rounds of tool calls");
            }
            rounds += 1;

            self.emitter.tool_calls(ctx, task, &response.tool_calls).await;
            messages.push(ChatMessage::assistant(response.content.clone()));
            for call in &response.tool_calls {
                let output = self.tools.invoke(call).await;
                messages.push(ChatMessage::tool(call.id.clone(), output));
            }
        }
    }

    async fn finish(
        &self,
        ctx: &mut WorkflowContext,
        name: &str,
        mut task: TaskRecord,
        outcome: Result<String>,
    ) {
        let persisted = match outcome {
            Ok(result) => {
                let persisted = self.ledger.complete_task(&mut task, result.clone()).await;
                ctx.set_task_result(name, result.clone());
                self.emitter.task_finished(ctx, &task, &result).await;
                persisted
            }
            Err(error) => {
                let failure = format!("Task failed: {error:#}");
                tracing::warn!(
                    event_name = "workflow.execute.task_failed",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    task_id = %task.id,
                    sub_task = %name,
                    error = %failure,
                    "sub-task failed; continuing with the next one"
                );
                let persisted = self.ledger.fail_task(&mut task, failure.clone()).await;
                ctx.set_task_result(name, failure.clone());
                self.emitter.error(ctx, Some(&task), &failure).await;
                persisted
            }
        };
        if let Err(error) = persisted {
            tracing::warn!(
                event_name = "workflow.execute.persist_failed",
                turn_id = %ctx.turn_id,
                task_id = %task.id,
                error = %error,
                "could not store sub-task outcome"
            );
        }
        if let Some(record) = ctx.sub_task_mut(name) {
            *record = task;
        }
    }
}

#[async_trait]
impl StageHandler for TaskExecuteHandler {
    fn stage(&self) -> WorkflowStatus {
        WorkflowStatus::TaskExecute
    }

    async fn process_event(&self, ctx: &mut WorkflowContext) -> Result<(), StageError> {
        let total = ctx.tasks().len();

        while let Some(name) = ctx.next_task() {
            let task = ctx
                .sub_task(&name)
                .cloned()
                .ok_or_else(|| StageError::Invariant(format!("sub-task `{name}` has no record")))?;
            tracing::info!(
                event_name = "workflow.execute.task_started",
                turn_id = %ctx.turn_id,
                session_id = %ctx.session_id,
                task_id = %task.id,
                index = ctx.current_task_index(),
                total,
                "running sub-task"
            );
            self.emitter.task_started(ctx, &task).await;

            let outcome = self.run(ctx, &task).await;
            self.finish(ctx, &name, task, outcome).await;

            let percent = self.progress_mode.percent(ctx.complete_task_count(), total);
            if let Err(error) = self.ledger.update_progress(ctx.parent_task_mut(), percent).await {
                tracing::warn!(
                    event_name = "workflow.execute.progress_failed",
                    turn_id = %ctx.turn_id,
                    error = %error,
                    "could not store parent progress"
                );
            }
        }

        Ok(())
    }

    fn transition_to(&self, _ctx: &WorkflowContext) -> Option<WorkflowStatus> {
        Some(WorkflowStatus::TaskExecuteComplete)
    }
}
