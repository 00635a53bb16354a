use std::collections::HashMap;

use tokio::sync::RwLock;

use agentflow_core::domain::message::SessionMessage;
use agentflow_core::domain::session::SessionId;
use agentflow_core::domain::task::{TaskId, TaskRecord};

use super::{MessageRepository, RepositoryError, TaskRepository};

/// Tasks in insertion order; upserts keep a task's original position.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<Vec<TaskRecord>>,
}

#[async_trait::async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save_task(&self, task: TaskRecord) -> Result<(), RepositoryError> {
        let mut tasks = self.tasks.write().await;
        match tasks.iter_mut().find(|existing| existing.id == task.id) {
            Some(existing) => *existing = task,
            None => tasks.push(task),
        }
        Ok(())
    }

    async fn find_task(&self, id: &TaskId) -> Result<Option<TaskRecord>, RepositoryError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.iter().find(|task| task.id == *id).cloned())
    }

    async fn list_sub_tasks(&self, parent_id: &TaskId) -> Result<Vec<TaskRecord>, RepositoryError> {
        let tasks = self.tasks.read().await;
        let mut children: Vec<TaskRecord> =
            tasks.iter().filter(|task| task.parent_id == *parent_id).cloned().collect();
        children.sort_by(|left, right| left.start_time.cmp(&right.start_time));
        Ok(children)
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<HashMap<String, Vec<SessionMessage>>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: SessionMessage) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        messages.entry(message.session_id.0.clone()).or_default().push(message);
        Ok(())
    }

    async fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<SessionMessage>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut history = messages.get(&session_id.0).cloned().unwrap_or_default();
        // Stable sort keeps append order for equal timestamps.
        history.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(history)
    }
}
