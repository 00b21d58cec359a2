//! Checkpoint repository for `SQLite` persistence.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::models::checkpoint::Checkpoint;
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for checkpoint records.
#[derive(Clone)]
pub struct CheckpointRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct CheckpointRow {
    id: String,
    execution_id: String,
    session_id: String,
    snapshot_ref: String,
    file_hashes: String,
    message_count: i64,
    summary: Option<String>,
    created_at: String,
}

impl CheckpointRow {
    /// Convert a database row into the domain model.
    fn into_checkpoint(self) -> Result<Checkpoint> {
        let file_hashes: HashMap<String, String> = serde_json::from_str(&self.file_hashes)
            .map_err(|e| AppError::Db(format!("invalid file_hashes: {e}")))?;
        let message_count = u64::try_from(self.message_count)
            .map_err(|e| AppError::Db(format!("invalid message_count: {e}")))?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Checkpoint {
            id: self.id,
            execution_id: self.execution_id,
            session_id: self.session_id,
            snapshot_ref: self.snapshot_ref,
            file_hashes,
            message_count,
            summary: self.summary,
            created_at,
        })
    }
}

impl CheckpointRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new checkpoint record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, checkpoint: &Checkpoint) -> Result<Checkpoint> {
        let file_hashes = serde_json::to_string(&checkpoint.file_hashes)
            .map_err(|e| AppError::Db(format!("failed to encode file_hashes: {e}")))?;
        let message_count = i64::try_from(checkpoint.message_count)
            .map_err(|e| AppError::Db(format!("message_count out of range: {e}")))?;
        let created_at = checkpoint.created_at.to_rfc3339();

        sqlx::query(
            "INSERT INTO checkpoint (id, execution_id, session_id, snapshot_ref, file_hashes,
             message_count, summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.execution_id)
        .bind(&checkpoint.session_id)
        .bind(&checkpoint.snapshot_ref)
        .bind(&file_hashes)
        .bind(message_count)
        .bind(&checkpoint.summary)
        .bind(&created_at)
        .execute(self.db.as_ref())
        .await?;

        Ok(checkpoint.clone())
    }

    /// Retrieve a checkpoint by identifier.
    ///
    /// Returns `Ok(None)` if the checkpoint does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as("SELECT * FROM checkpoint WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    /// List checkpoints for an execution, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_execution(&self, execution_id: &str) -> Result<Vec<Checkpoint>> {
        let rows: Vec<CheckpointRow> =
            sqlx::query_as("SELECT * FROM checkpoint WHERE execution_id = ?1 ORDER BY created_at")
                .bind(execution_id)
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(CheckpointRow::into_checkpoint).collect()
    }
}
