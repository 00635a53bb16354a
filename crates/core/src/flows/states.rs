use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::{SessionId, TurnId};

/// Stage of a single turn inside the workflow engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Initialized,
    Analyze,
    TaskSplit,
    TaskSplitComplete,
    TaskExecute,
    TaskExecuteComplete,
    Summarize,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Analyze => "ANALYZE",
            Self::TaskSplit => "TASK_SPLIT",
            Self::TaskSplitComplete => "TASK_SPLIT_COMPLETE",
            Self::TaskExecute => "TASK_EXECUTE",
            Self::TaskExecuteComplete => "TASK_EXECUTE_COMPLETE",
            Self::Summarize => "SUMMARIZE",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the transition table accepts `from -> to`.
    pub fn can_transition(from: Self, to: Self) -> bool {
        crate::flows::engine::validate_transition(from, to).is_ok()
    }

    /// The state that follows this one on the happy path.
    pub fn successor(&self) -> Option<Self> {
        match self {
            Self::Initialized => Some(Self::Analyze),
            Self::Analyze => Some(Self::TaskSplit),
            Self::TaskSplit => Some(Self::TaskSplitComplete),
            Self::TaskSplitComplete => Some(Self::TaskExecute),
            Self::TaskExecute => Some(Self::TaskExecuteComplete),
            Self::TaskExecuteComplete => Some(Self::Summarize),
            Self::Summarize => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one status change, handed to stage handlers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub turn_id: TurnId,
    pub session_id: SessionId,
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub occurred_at: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(
        turn_id: TurnId,
        session_id: SessionId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Self {
        Self { turn_id, session_id, from, to, occurred_at: Utc::now() }
    }
}
