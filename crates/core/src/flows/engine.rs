use thiserror::Error;

use crate::flows::states::WorkflowStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowTransitionError {
    #[error("workflow already finished in {state:?}")]
    Terminal { state: WorkflowStatus },
    #[error("invalid workflow transition from {from:?} to {to:?}")]
    InvalidTransition { from: WorkflowStatus, to: WorkflowStatus },
}

/// Checks a transition against the forward stage order. `Failed` is reachable
/// from every non-terminal state; nothing leaves a terminal state.
pub fn validate_transition(
    from: WorkflowStatus,
    to: WorkflowStatus,
) -> Result<(), WorkflowTransitionError> {
    if from.is_terminal() {
        return Err(WorkflowTransitionError::Terminal { state: from });
    }

    match (from, to) {
        (_, WorkflowStatus::Failed) => Ok(()),
        (from, to) if from.successor() == Some(to) => Ok(()),
        _ => Err(WorkflowTransitionError::InvalidTransition { from, to }),
    }
}
