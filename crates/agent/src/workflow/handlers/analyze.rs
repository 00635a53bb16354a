use std::sync::Arc;

use async_trait::async_trait;

use agentflow_core::flows::WorkflowStatus;

use crate::workflow::bus::StageHandler;
use crate::workflow::clarification::ClarificationManager;
use crate::workflow::context::WorkflowContext;
use crate::workflow::StageError;

pub struct AnalyzeHandler {
    clarification: Arc<ClarificationManager>,
}

impl AnalyzeHandler {
    pub fn new(clarification: Arc<ClarificationManager>) -> Self {
        Self { clarification }
    }
}

#[async_trait]
impl StageHandler for AnalyzeHandler {
    fn stage(&self) -> WorkflowStatus {
        WorkflowStatus::Analyze
    }

    async fn process_event(&self, ctx: &mut WorkflowContext) -> Result<(), StageError> {
        let complete = self.clarification.check_info_complete(ctx, 0).await;
        ctx.set_info_complete(complete);
        if !complete {
            ctx.record_failure("request could not be clarified");
        }
        Ok(())
    }

    fn transition_to(&self, ctx: &WorkflowContext) -> Option<WorkflowStatus> {
        match ctx.failure_reason() {
            Some(_) => Some(WorkflowStatus::Failed),
            None => Some(WorkflowStatus::TaskSplit),
        }
    }
}
