//! Task-to-session mapping repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::execution::SessionRecord;
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for task session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    task_id: String,
    session_id: String,
    updated_at: String,
}

impl SessionRow {
    fn into_record(self) -> Result<SessionRecord> {
        let updated_at = chrono::DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| AppError::Db(format!("invalid updated_at: {e}")))?
            .with_timezone(&Utc);

        Ok(SessionRecord {
            task_id: self.task_id,
            session_id: self.session_id,
            updated_at,
        })
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace the session record for a task.
    ///
    /// The latest write wins; a task maps to exactly one session id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn upsert(&self, record: &SessionRecord) -> Result<()> {
        let updated_at = record.updated_at.to_rfc3339();

        sqlx::query(
            "INSERT INTO task_session (task_id, session_id, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id) DO UPDATE SET
                 session_id = excluded.session_id,
                 updated_at = excluded.updated_at",
        )
        .bind(&record.task_id)
        .bind(&record.session_id)
        .bind(&updated_at)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Retrieve the session record for a task, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, task_id: &str) -> Result<Option<SessionRecord>> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM task_session WHERE task_id = ?1")
                .bind(task_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(SessionRow::into_record).transpose()
    }
}
