use async_trait::async_trait;

use agentflow_core::flows::WorkflowStatus;

use crate::workflow::bus::StageHandler;
use crate::workflow::context::WorkflowContext;
use crate::workflow::emit::Emitter;
use crate::workflow::StageError;

/// Marker stages between the working ones. `TASK_SPLIT_COMPLETE` announces
/// the plan; `TASK_EXECUTE_COMPLETE` only moves on.
pub struct CheckpointHandler {
    stage: WorkflowStatus,
    emitter: Emitter,
}

impl CheckpointHandler {
    pub fn split_complete(emitter: Emitter) -> Self {
        Self { stage: WorkflowStatus::TaskSplitComplete, emitter }
    }

    pub fn execute_complete(emitter: Emitter) -> Self {
        Self { stage: WorkflowStatus::TaskExecuteComplete, emitter }
    }
}

#[async_trait]
impl StageHandler for CheckpointHandler {
    fn stage(&self) -> WorkflowStatus {
        self.stage
    }

    async fn process_event(&self, ctx: &mut WorkflowContext) -> Result<(), StageError> {
        match self.stage {
            WorkflowStatus::TaskSplitComplete => self.emitter.plan(ctx).await,
            WorkflowStatus::TaskExecuteComplete => {
                tracing::info!(
                    event_name = "workflow.execute.finished",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    complete = ctx.complete_task_count(),
                    total = ctx.tasks().len(),
                    "all sub-tasks handled"
                );
            }
            other => {
                return Err(StageError::Invariant(format!("{other} is not a checkpoint stage")));
            }
        }
        Ok(())
    }

    fn transition_to(&self, _ctx: &WorkflowContext) -> Option<WorkflowStatus> {
        match self.stage {
            WorkflowStatus::TaskSplitComplete => Some(WorkflowStatus::TaskExecute),
            WorkflowStatus::TaskExecuteComplete => Some(WorkflowStatus::Summarize),
            _ => None,
        }
    }
}
