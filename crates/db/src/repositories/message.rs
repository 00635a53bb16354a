use sqlx::{sqlite::SqliteRow, Row};

use agentflow_core::domain::message::{MessageId, MessageKind, MessageRole, SessionMessage};
use agentflow_core::domain::session::SessionId;

use super::task::{format_timestamp, parse_timestamp};
use super::{MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: SessionMessage) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO session_message (
                id,
                session_id,
                role,
                kind,
                content,
                token_count,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.session_id.0)
        .bind(message.role.as_str())
        .bind(message.kind.as_str())
        .bind(&message.content)
        .bind(i64::from(message.token_count))
        .bind(format_timestamp(&message.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<SessionMessage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, kind, content, token_count, created_at
             FROM session_message
             WHERE session_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

fn message_from_row(row: SqliteRow) -> Result<SessionMessage, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = MessageKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message kind `{kind_raw}`")))?;
    let token_count_raw = row.try_get::<i64, _>("token_count")?;
    let token_count = u32::try_from(token_count_raw).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `token_count` (expected non-negative u32): {token_count_raw}"
        ))
    })?;

    Ok(SessionMessage {
        id: MessageId(row.try_get("id")?),
        session_id: SessionId(row.try_get("session_id")?),
        role,
        kind,
        content: row.try_get("content")?,
        token_count,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use agentflow_core::domain::message::{MessageKind, MessageRole, SessionMessage};
    use agentflow_core::domain::session::SessionId;

    use super::SqlMessageRepository;
    use crate::migrations;
    use crate::repositories::MessageRepository;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn sql_message_repo_returns_history_in_order() {
        let pool = setup_pool().await;
        let repo = SqlMessageRepository::new(pool);
        let session = SessionId::new("s-9");

        let question = message(&session, MessageRole::User, "find me a flight", "2026-03-01T09:00:00Z");
        let clarification = SessionMessage {
            kind: MessageKind::Clarification,
            ..message(&session, MessageRole::Assistant, "From which city?", "2026-03-01T09:00:01Z")
        };
        let answer = message(&session, MessageRole::User, "Berlin", "2026-03-01T09:00:01.5Z");

        repo.append(answer.clone()).await.expect("append");
        repo.append(question.clone()).await.expect("append");
        repo.append(clarification.clone()).await.expect("append");
        repo.append(message(&SessionId::new("other"), MessageRole::User, "hi", "2026-03-01T08:00:00Z"))
            .await
            .expect("append");

        let history = repo.list_for_session(&session).await.expect("list");
        assert_eq!(history, vec![question, clarification, answer]);
    }

    fn message(session: &SessionId, role: MessageRole, content: &str, at: &str) -> SessionMessage {
        let mut message = SessionMessage::new(session.clone(), role, MessageKind::Chat, content, 4);
        message.created_at =
            DateTime::parse_from_rfc3339(at).expect("valid rfc3339").with_timezone(&Utc);
        message
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }
}
