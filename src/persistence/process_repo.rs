//! Background process repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::process::{BackgroundProcess, LogSource};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for background process records.
#[derive(Clone)]
pub struct ProcessRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ProcessRow {
    id: String,
    project_id: String,
    execution_id: Option<String>,
    pid: i64,
    command: String,
    started_at: String,
    exit_code: Option<i64>,
    exit_signal: Option<String>,
    log_source: String,
    log_path: Option<String>,
}

impl ProcessRow {
    /// Convert a database row into the domain model.
    fn into_process(self) -> Result<BackgroundProcess> {
        let pid =
            u32::try_from(self.pid).map_err(|e| AppError::Db(format!("invalid pid: {e}")))?;
        let exit_code = self
            .exit_code
            .map(|c| i32::try_from(c).map_err(|e| AppError::Db(format!("invalid exit_code: {e}"))))
            .transpose()?;
        let started_at = chrono::DateTime::parse_from_rfc3339(&self.started_at)
            .map_err(|e| AppError::Db(format!("invalid started_at: {e}")))?
            .with_timezone(&Utc);
        let log_source = parse_log_source(&self.log_source, self.log_path)?;

        Ok(BackgroundProcess {
            id: self.id,
            project_id: self.project_id,
            execution_id: self.execution_id,
            pid,
            command: self.command,
            started_at,
            exit_code,
            exit_signal: self.exit_signal,
            log_source,
        })
    }
}

fn parse_log_source(kind: &str, path: Option<String>) -> Result<LogSource> {
    match kind {
        "owned_pipe" => Ok(LogSource::OwnedPipe),
        "log_file" => {
            let path =
                path.ok_or_else(|| AppError::Db("log_file source without log_path".into()))?;
            Ok(LogSource::LogFile(path))
        }
        "none" => Ok(LogSource::None),
        other => Err(AppError::Db(format!("invalid log_source: {other}"))),
    }
}

fn log_source_parts(source: &LogSource) -> (&'static str, Option<&str>) {
    match source {
        LogSource::OwnedPipe => ("owned_pipe", None),
        LogSource::LogFile(path) => ("log_file", Some(path.as_str())),
        LogSource::None => ("none", None),
    }
}

impl ProcessRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new background process record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, process: &BackgroundProcess) -> Result<BackgroundProcess> {
        let (log_source, log_path) = log_source_parts(&process.log_source);
        let started_at = process.started_at.to_rfc3339();
        let pid = i64::from(process.pid);
        let exit_code = process.exit_code.map(i64::from);

        sqlx::query(
            "INSERT INTO background_process (id, project_id, execution_id, pid, command,
             started_at, exit_code, exit_signal, log_source, log_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&process.id)
        .bind(&process.project_id)
        .bind(&process.execution_id)
        .bind(pid)
        .bind(&process.command)
        .bind(&started_at)
        .bind(exit_code)
        .bind(&process.exit_signal)
        .bind(log_source)
        .bind(log_path)
        .execute(self.db.as_ref())
        .await?;

        Ok(process.clone())
    }

    /// Record a terminal exit status for a process.
    ///
    /// Only writes when the row is not already terminal; terminal state is
    /// monotonic.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_exited(
        &self,
        id: &str,
        exit_code: Option<i32>,
        exit_signal: Option<&str>,
    ) -> Result<()> {
        let exit_code = exit_code.map(i64::from);

        sqlx::query(
            "UPDATE background_process SET exit_code = ?1, exit_signal = ?2
             WHERE id = ?3 AND exit_code IS NULL AND exit_signal IS NULL",
        )
        .bind(exit_code)
        .bind(exit_signal)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Retrieve a process record by identifier.
    ///
    /// Returns `Ok(None)` if the record does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<BackgroundProcess>> {
        let row: Option<ProcessRow> =
            sqlx::query_as("SELECT * FROM background_process WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(ProcessRow::into_process).transpose()
    }

    /// List process records not yet recorded as terminated.
    ///
    /// These are the candidates for re-tracking after a restart.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_active(&self) -> Result<Vec<BackgroundProcess>> {
        let rows: Vec<ProcessRow> = sqlx::query_as(
            "SELECT * FROM background_process WHERE exit_code IS NULL AND exit_signal IS NULL",
        )
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(ProcessRow::into_process).collect()
    }

    /// List all process records for a project.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_project(&self, project_id: &str) -> Result<Vec<BackgroundProcess>> {
        let rows: Vec<ProcessRow> = sqlx::query_as(
            "SELECT * FROM background_process WHERE project_id = ?1 ORDER BY started_at",
        )
        .bind(project_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(ProcessRow::into_process).collect()
    }
}
