use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use agentflow_core::domain::session::SessionId;
use agentflow_core::domain::task::{TaskId, TaskRecord, TaskStatus};

use super::{RepositoryError, TaskRepository};
use crate::DbPool;

pub struct SqlTaskRepository {
    pool: DbPool,
}

impl SqlTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TaskRepository for SqlTaskRepository {
    async fn save_task(&self, task: TaskRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO workflow_task (
                id,
                parent_id,
                name,
                session_id,
                owner_id,
                status,
                progress,
                result,
                start_time,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                parent_id = excluded.parent_id,
                name = excluded.name,
                session_id = excluded.session_id,
                owner_id = excluded.owner_id,
                status = excluded.status,
                progress = excluded.progress,
                result = excluded.result,
                updated_at = excluded.updated_at",
        )
        .bind(&task.id.0)
        .bind(&task.parent_id.0)
        .bind(&task.name)
        .bind(&task.session_id.0)
        .bind(&task.owner_id)
        .bind(task.status.as_str())
        .bind(i64::from(task.progress))
        .bind(task.result.as_deref())
        .bind(format_timestamp(&task.start_time))
        .bind(format_timestamp(&task.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_task(&self, id: &TaskId) -> Result<Option<TaskRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                parent_id,
                name,
                session_id,
                owner_id,
                status,
                progress,
                result,
                start_time,
                updated_at
             FROM workflow_task
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(task_from_row).transpose()
    }

    async fn list_sub_tasks(&self, parent_id: &TaskId) -> Result<Vec<TaskRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                parent_id,
                name,
                session_id,
                owner_id,
                status,
                progress,
                result,
                start_time,
                updated_at
             FROM workflow_task
             WHERE parent_id = ?
             ORDER BY start_time ASC, rowid ASC",
        )
        .bind(&parent_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(task_from_row).collect()
    }
}

/// Fixed-width rfc3339 so lexical order in SQL matches time order.
pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn task_from_row(row: SqliteRow) -> Result<TaskRecord, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task status `{status_raw}`")))?;

    let progress_raw = row.try_get::<i64, _>("progress")?;
    let progress = u8::try_from(progress_raw).ok().filter(|value| *value <= 100).ok_or_else(|| {
        RepositoryError::Decode(format!("invalid value for `progress`: {progress_raw}"))
    })?;

    Ok(TaskRecord {
        id: TaskId(row.try_get("id")?),
        parent_id: TaskId(row.try_get("parent_id")?),
        name: row.try_get("name")?,
        session_id: SessionId(row.try_get("session_id")?),
        owner_id: row.try_get("owner_id")?,
        status,
        progress,
        start_time: parse_timestamp("start_time", row.try_get("start_time")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        result: row.try_get("result")?,
    })
}
