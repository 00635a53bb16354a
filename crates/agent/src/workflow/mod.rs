//! Turn lifecycle: context, stage handlers, event bus and the orchestrator
//! that starts and resumes turns.

pub mod bus;
pub mod clarification;
pub mod context;
pub mod emit;
pub mod handlers;
pub mod history;
pub mod ledger;
pub mod orchestrator;

use thiserror::Error;

use agentflow_core::errors::ApplicationError;
use agentflow_db::repositories::RepositoryError;

use crate::transport::TransportError;

pub use bus::{EventBus, StageHandler};
pub use clarification::{
    ClarificationError, ClarificationManager, ClarificationRegistry, ClarificationReply,
};
pub use context::{TurnSeed, WorkflowContext};
pub use orchestrator::{EngineDependencies, TurnDispatch, TurnRequest, WorkflowOrchestrator};

/// Error a stage handler returns to the bus. The bus logs it and stops the
/// chain; it never reaches the caller of the turn.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
}

/// Failures surfaced to whoever submits or resumes a turn.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
    #[error(transparent)]
    Clarification(#[from] ClarificationError),
}

impl From<WorkflowError> for ApplicationError {
    fn from(error: WorkflowError) -> Self {
        match error {
            WorkflowError::Persistence(inner) => Self::Persistence(inner.to_string()),
            WorkflowError::Transport(inner) => Self::Integration(inner.to_string()),
            WorkflowError::Clarification(inner) => Self::Integration(inner.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use agentflow_core::domain::session::SessionId;
    use agentflow_core::errors::ApplicationError;

    use super::{ClarificationError, WorkflowError};

    #[test]
    fn workflow_errors_map_onto_application_layer() {
        let error = WorkflowError::from(ClarificationError::NoPendingSlot(SessionId::new("s-1")));
        let mapped = ApplicationError::from(error);

        assert!(matches!(mapped, ApplicationError::Integration(message) if message.contains("s-1")));
    }
}
