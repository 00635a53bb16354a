use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::session::SessionId;

const ROOT_PARENT_ID: &str = "0";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parent id carried by root (umbrella) tasks.
    pub fn root() -> Self {
        Self(ROOT_PARENT_ID.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_PARENT_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Progressing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progressing => "progressing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "progressing" => Some(Self::Progressing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A parent task (one per turn) or one of its sub-tasks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub parent_id: TaskId,
    pub name: String,
    pub session_id: SessionId,
    pub owner_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub start_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<String>,
}

impl TaskRecord {
    pub fn parent(
        name: impl Into<String>,
        session_id: SessionId,
        owner_id: impl Into<String>,
    ) -> Self {
        Self::new(TaskId::root(), name, session_id, owner_id)
    }

    pub fn sub_task(parent: &TaskRecord, name: impl Into<String>) -> Self {
        Self::new(parent.id.clone(), name, parent.session_id.clone(), parent.owner_id.clone())
    }

    fn new(
        parent_id: TaskId,
        name: impl Into<String>,
        session_id: SessionId,
        owner_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            parent_id,
            name: name.into(),
            session_id,
            owner_id: owner_id.into(),
            status: TaskStatus::Progressing,
            progress: 0,
            start_time: now,
            updated_at: now,
            result: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_root()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
