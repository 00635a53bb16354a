use async_trait::async_trait;
use thiserror::Error;

use agentflow_core::domain::message::SessionMessage;
use agentflow_core::domain::session::SessionId;
use agentflow_core::domain::task::{TaskId, TaskRecord};

pub mod memory;
pub mod message;
pub mod task;

pub use memory::{InMemoryMessageRepository, InMemoryTaskRepository};
pub use message::SqlMessageRepository;
pub use task::SqlTaskRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Durable store for parent tasks and their sub-tasks.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Inserts or replaces the record with the same id.
    async fn save_task(&self, task: TaskRecord) -> Result<(), RepositoryError>;

    async fn find_task(&self, id: &TaskId) -> Result<Option<TaskRecord>, RepositoryError>;

    /// Children of `parent_id`, oldest first.
    async fn list_sub_tasks(&self, parent_id: &TaskId) -> Result<Vec<TaskRecord>, RepositoryError>;
}

/// Append-only conversation history per session.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: SessionMessage) -> Result<(), RepositoryError>;

    /// Messages of one session in chronological order.
    async fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<SessionMessage>, RepositoryError>;
}
