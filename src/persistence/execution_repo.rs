//! Execution repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::execution::{Execution, ExecutionStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for execution records.
#[derive(Clone)]
pub struct ExecutionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: String,
    task_id: String,
    working_dir: String,
    prompt: String,
    status: String,
    session_id: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl ExecutionRow {
    /// Convert a database row into the domain model.
    fn into_execution(self) -> Result<Execution> {
        let status = parse_status(&self.status)?;
        let started_at = chrono::DateTime::parse_from_rfc3339(&self.started_at)
            .map_err(|e| AppError::Db(format!("invalid started_at: {e}")))?
            .with_timezone(&Utc);
        let completed_at = self
            .completed_at
            .as_deref()
            .map(|s| {
                chrono::DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| AppError::Db(format!("invalid completed_at: {e}")))
            })
            .transpose()?;

        Ok(Execution {
            id: self.id,
            task_id: self.task_id,
            working_dir: self.working_dir,
            prompt: self.prompt,
            status,
            session_id: self.session_id,
            started_at,
            completed_at,
        })
    }
}

fn parse_status(s: &str) -> Result<ExecutionStatus> {
    match s {
        "running" => Ok(ExecutionStatus::Running),
        "completed" => Ok(ExecutionStatus::Completed),
        "failed" => Ok(ExecutionStatus::Failed),
        "cancelled" => Ok(ExecutionStatus::Cancelled),
        other => Err(AppError::Db(format!("invalid execution status: {other}"))),
    }
}

fn status_str(s: ExecutionStatus) -> &'static str {
    match s {
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

impl ExecutionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new execution record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, execution: &Execution) -> Result<Execution> {
        let status = status_str(execution.status);
        let started_at = execution.started_at.to_rfc3339();
        let completed_at = execution.completed_at.map(|dt| dt.to_rfc3339());

        sqlx::query(
            "INSERT INTO execution (id, task_id, working_dir, prompt, status, session_id,
             started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&execution.id)
        .bind(&execution.task_id)
        .bind(&execution.working_dir)
        .bind(&execution.prompt)
        .bind(status)
        .bind(&execution.session_id)
        .bind(&started_at)
        .bind(&completed_at)
        .execute(self.db.as_ref())
        .await?;

        Ok(execution.clone())
    }

    /// Retrieve an execution by identifier.
    ///
    /// Returns `Ok(None)` if the execution does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Execution>> {
        let row: Option<ExecutionRow> = sqlx::query_as("SELECT * FROM execution WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(ExecutionRow::into_execution).transpose()
    }

    /// Record the upstream session id for an execution.
    ///
    /// Only writes when no session id is recorded yet; the first captured
    /// session id is immutable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_session_id(&self, id: &str, session_id: &str) -> Result<()> {
        sqlx::query("UPDATE execution SET session_id = ?1 WHERE id = ?2 AND session_id IS NULL")
            .bind(session_id)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }

    /// Move an execution to a terminal status, stamping the completion time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_status(&self, id: &str, status: ExecutionStatus) -> Result<()> {
        let status_s = status_str(status);
        let completed_at = status.is_terminal().then(|| Utc::now().to_rfc3339());

        sqlx::query("UPDATE execution SET status = ?1, completed_at = ?2 WHERE id = ?3")
            .bind(status_s)
            .bind(&completed_at)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }

    /// List executions still recorded as running.
    ///
    /// After an unclean shutdown these are the stale rows to reconcile on
    /// startup.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_running(&self) -> Result<Vec<Execution>> {
        let rows: Vec<ExecutionRow> =
            sqlx::query_as("SELECT * FROM execution WHERE status = 'running'")
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(ExecutionRow::into_execution).collect()
    }
}
