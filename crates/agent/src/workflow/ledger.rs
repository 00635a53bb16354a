use std::sync::Arc;

use chrono::Utc;

use agentflow_core::domain::session::SessionId;
use agentflow_core::domain::task::{TaskRecord, TaskStatus};
use agentflow_db::repositories::{RepositoryError, TaskRepository};

/// Bookkeeping for the parent task of a turn and its sub-tasks. Records are
/// mutated in place and then persisted.
pub struct TaskLedger {
    repository: Arc<dyn TaskRepository>,
}

impl TaskLedger {
    pub fn new(repository: Arc<dyn TaskRepository>) -> Self {
        Self { repository }
    }

    pub async fn create_parent_task(
        &self,
        name: &str,
        session_id: SessionId,
        owner_id: &str,
    ) -> Result<TaskRecord, RepositoryError> {
        let task = TaskRecord::parent(name, session_id, owner_id);
        self.repository.save_task(task.clone()).await?;
        Ok(task)
    }

    pub async fn create_sub_task(
        &self,
        parent: &TaskRecord,
        name: &str,
    ) -> Result<TaskRecord, RepositoryError> {
        let task = TaskRecord::sub_task(parent, name);
        self.repository.save_task(task.clone()).await?;
        Ok(task)
    }

    pub async fn update_progress(
        &self,
        task: &mut TaskRecord,
        progress: u8,
    ) -> Result<(), RepositoryError> {
        task.progress = progress.min(100);
        self.persist(task).await
    }

    pub async fn complete_task(
        &self,
        task: &mut TaskRecord,
        result: impl Into<String>,
    ) -> Result<(), RepositoryError> {
        task.status = TaskStatus::Completed;
        task.progress = 100;
        task.result = Some(result.into());
        self.persist(task).await
    }

    /// Progress is left as it was.
    pub async fn fail_task(
        &self,
        task: &mut TaskRecord,
        reason: impl Into<String>,
    ) -> Result<(), RepositoryError> {
        task.status = TaskStatus::Failed;
        task.result = Some(reason.into());
        self.persist(task).await
    }

    async fn persist(&self, task: &mut TaskRecord) -> Result<(), RepositoryError> {
        task.updated_at = Utc::now();
        self.repository.save_task(task.clone()).await
    }
}
