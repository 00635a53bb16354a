use std::sync::Arc;

use async_trait::async_trait;

use agentflow_core::flows::WorkflowStatus;

use crate::workflow::bus::StageHandler;
use crate::workflow::context::WorkflowContext;
use crate::workflow::emit::Emitter;
use crate::workflow::ledger::TaskLedger;
use crate::workflow::StageError;

const DEFAULT_FAILURE_REASON: &str = "workflow failed";

/// Closes out a failed turn: the parent task is marked failed and, unless an
/// earlier stage already reported the error, the connection is ended with
/// an error event.
pub struct FailureHandler {
    ledger: Arc<TaskLedger>,
    emitter: Emitter,
}

impl FailureHandler {
    pub fn new(ledger: Arc<TaskLedger>, emitter: Emitter) -> Self {
        Self { ledger, emitter }
    }
}

#[async_trait]
impl StageHandler for FailureHandler {
    fn stage(&self) -> WorkflowStatus {
        WorkflowStatus::Failed
    }

    async fn process_event(&self, ctx: &mut WorkflowContext) -> Result<(), StageError> {
        let reason = ctx.failure_reason().unwrap_or(DEFAULT_FAILURE_REASON).to_string();
        tracing::warn!(
            event_name = "workflow.turn.failed",
            turn_id = %ctx.turn_id,
            session_id = %ctx.session_id,
            previous = ?ctx.previous_status(),
            reason = %reason,
            "turn failed"
        );

        let persisted = self.ledger.fail_task(ctx.parent_task_mut(), reason.clone()).await;
        if !ctx.error_reported() {
            self.emitter.fail(ctx, &reason).await;
        }
        persisted.map_err(StageError::from)
    }

    fn transition_to(&self, _ctx: &WorkflowContext) -> Option<WorkflowStatus> {
        None
    }
}
