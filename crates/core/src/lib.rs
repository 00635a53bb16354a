pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod telemetry;
pub mod tokens;

pub use config::{AppConfig, LoadOptions, OverflowStrategyKind, ProgressMode};
pub use domain::message::{MessageId, MessageKind, MessageRole, SessionMessage};
pub use domain::session::{AgentProfile, SessionId, TurnId};
pub use domain::task::{TaskId, TaskRecord, TaskStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{validate_transition, WorkflowEvent, WorkflowStatus, WorkflowTransitionError};
pub use tokens::{EstimatingCounter, TokenCounter};
