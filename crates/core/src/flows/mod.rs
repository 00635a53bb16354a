pub mod engine;
pub mod states;

pub use engine::{validate_transition, WorkflowTransitionError};
pub use states::{WorkflowEvent, WorkflowStatus};
