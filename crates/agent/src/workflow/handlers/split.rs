use std::sync::Arc;

use async_trait::async_trait;

use agentflow_core::flows::WorkflowStatus;

use crate::llm::{ChatClient, ChatMessage, ChatRequest};
use crate::prompts;
use crate::workflow::bus::StageHandler;
use crate::workflow::context::WorkflowContext;
use crate::workflow::history::HistoryAssembler;
use crate::workflow::ledger::TaskLedger;
use crate::workflow::StageError;

/// Breaks the request into ordered sub-tasks and opens a task record for
/// each one.
pub struct TaskSplitHandler {
    chat: Arc<dyn ChatClient>,
    history: Arc<HistoryAssembler>,
    ledger: Arc<TaskLedger>,
    max_sub_tasks: usize,
}

impl TaskSplitHandler {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        history: Arc<HistoryAssembler>,
        ledger: Arc<TaskLedger>,
        max_sub_tasks: usize,
    ) -> Self {
        Self { chat, history, ledger, max_sub_tasks: max_sub_tasks.max(1) }
    }

    async fn plan(&self, ctx: &WorkflowContext) -> Result<Vec<String>, String> {
        let mut messages = self
            .history
            .assemble(&ctx.session_id, ctx.agent.system_prompt.as_deref())
            .await
            .map_err(|error| error.to_string())?;
        messages.push(ChatMessage::user(prompts::task_split(&ctx.goal(), self.max_sub_tasks)));

        let response = self
            .chat
            .complete(ChatRequest::new(messages).with_model(ctx.model.clone()))
            .await
            .map_err(|error| format!("task split failed: {error}"))?;

        let mut names = prompts::parse_task_list(&response.content)
            .map_err(|error| format!("task split reply is not a task list: {error}"))?;
        if names.is_empty() {
            names.push(ctx.goal());
        }
        names.truncate(self.max_sub_tasks);
        Ok(names)
    }
}

#[async_trait]
impl StageHandler for TaskSplitHandler {
    fn stage(&self) -> WorkflowStatus {
        WorkflowStatus::TaskSplit
    }

    async fn process_event(&self, ctx: &mut WorkflowContext) -> Result<(), StageError> {
        let names = match self.plan(ctx).await {
            Ok(names) => names,
            Err(reason) => {
                tracing::error!(
                    event_name = "workflow.split.failed",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    error = %reason,
                    "could not split request"
                );
                ctx.record_failure(reason);
                return Ok(());
            }
        };

        for name in names {
            if ctx.sub_task(&name).is_some() {
                tracing::warn!(
                    event_name = "workflow.split.duplicate_dropped",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    sub_task = %name,
                    "model listed the same sub-task twice; keeping the first"
                );
                continue;
            }
            match self.ledger.create_sub_task(ctx.parent_task(), &name).await {
                Ok(record) => {
                    ctx.add_sub_task(name, record);
                }
                Err(error) => {
                    tracing::error!(
                        event_name = "workflow.split.persist_failed",
                        turn_id = %ctx.turn_id,
                        session_id = %ctx.session_id,
                        sub_task = %name,
                        error = %error,
                        "could not record sub-task"
                    );
                    ctx.record_failure(format!("could not record sub-task `{name}`: {error}"));
                    return Ok(());
                }
            }
        }

        tracing::info!(
            event_name = "workflow.split.planned",
            turn_id = %ctx.turn_id,
            session_id = %ctx.session_id,
            sub_tasks = ctx.tasks().len(),
            "request split into sub-tasks"
        );
        Ok(())
    }

    fn transition_to(&self, ctx: &WorkflowContext) -> Option<WorkflowStatus> {
        match ctx.failure_reason() {
            Some(_) => Some(WorkflowStatus::Failed),
            None => Some(WorkflowStatus::TaskSplitComplete),
        }
    }
}
