//! Session continuity and checkpoint capture.
//!
//! Two independent rewind mechanisms are layered, not merged: a filesystem
//! snapshot (SHA-256 file hashes taken immediately before an execution
//! starts) governs filesystem state, and the in-band checkpoint marker
//! reported by the upstream API governs conversational state. Marker
//! capture is two-phase: `capture_marker` overwrites an ephemeral slot
//! ("latest wins"), and `save_checkpoint` commits it exactly once on
//! successful completion, clearing the slot. Cancelled or failed
//! executions discard their slots and never produce a checkpoint row.

use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::checkpoint::Checkpoint;
use crate::models::execution::SessionRecord;
use crate::persistence::checkpoint_repo::CheckpointRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::{AppError, Result};

/// Checkpoint store plus per-task session continuity.
pub struct CheckpointManager {
    checkpoint_repo: CheckpointRepo,
    session_repo: SessionRepo,
    /// Latest upstream marker per execution; cleared on commit or discard.
    markers: Mutex<HashMap<String, String>>,
    /// Pre-start workspace snapshot per execution; cleared with the marker.
    snapshots: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl CheckpointManager {
    /// Create a manager over the checkpoint and session repositories.
    #[must_use]
    pub fn new(checkpoint_repo: CheckpointRepo, session_repo: SessionRepo) -> Self {
        Self {
            checkpoint_repo,
            session_repo,
            markers: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Store the latest checkpoint marker for an execution, overwriting any
    /// prior value.
    pub async fn capture_marker(&self, execution_id: &str, marker: String) {
        debug!(execution_id, marker, "checkpoint marker captured");
        self.markers
            .lock()
            .await
            .insert(execution_id.to_owned(), marker);
    }

    /// Hash the working directory and stash the snapshot for the execution.
    ///
    /// Called immediately before the upstream stream starts; committed into
    /// the checkpoint row on success.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory cannot be read. Callers
    /// treat snapshot failure as best-effort and continue the execution.
    pub async fn snapshot_workspace(&self, execution_id: &str, dir: &Path) -> Result<usize> {
        let hashes = hash_workspace_files(dir)?;
        let count = hashes.len();
        self.snapshots
            .lock()
            .await
            .insert(execution_id.to_owned(), hashes);
        debug!(execution_id, files_hashed = count, "workspace snapshot taken");
        Ok(count)
    }

    /// Commit the captured marker into a persisted checkpoint row.
    ///
    /// No-op returning `Ok(None)` when no marker was captured for the
    /// execution. Clears both ephemeral slots on commit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails; checkpointing is
    /// best-effort, so callers log and drop the error rather than failing
    /// the execution.
    pub async fn save_checkpoint(
        &self,
        execution_id: &str,
        session_id: &str,
        message_count: u64,
        summary: Option<String>,
    ) -> Result<Option<Checkpoint>> {
        let Some(marker) = self.markers.lock().await.remove(execution_id) else {
            debug!(execution_id, "no checkpoint marker captured, skipping save");
            return Ok(None);
        };
        let file_hashes = self
            .snapshots
            .lock()
            .await
            .remove(execution_id)
            .unwrap_or_default();

        let checkpoint = Checkpoint::new(
            execution_id.to_owned(),
            session_id.to_owned(),
            marker,
            file_hashes,
            message_count,
            summary,
        );
        let saved = self.checkpoint_repo.create(&checkpoint).await?;

        info!(
            execution_id,
            checkpoint_id = saved.id,
            message_count,
            "checkpoint committed"
        );
        Ok(Some(saved))
    }

    /// Drop any ephemeral marker and snapshot for an execution.
    ///
    /// Called on cancellation and failure so state never dangles across
    /// executions.
    pub async fn discard(&self, execution_id: &str) {
        self.markers.lock().await.remove(execution_id);
        self.snapshots.lock().await.remove(execution_id);
    }

    /// Upsert the most recent upstream session id for a logical task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn record_session(&self, task_id: &str, session_id: &str) -> Result<()> {
        let record = SessionRecord::new(task_id.to_owned(), session_id.to_owned());
        self.session_repo.upsert(&record).await?;
        info!(task_id, session_id, "session record updated");
        Ok(())
    }

    /// Most recent upstream session id for a logical task, letting the next
    /// execution resume the same upstream conversation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn resume_options(&self, task_id: &str) -> Result<Option<String>> {
        Ok(self
            .session_repo
            .get(task_id)
            .await?
            .map(|record| record.session_id))
    }

    /// Checkpoints persisted for an execution, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_checkpoints(&self, execution_id: &str) -> Result<Vec<Checkpoint>> {
        self.checkpoint_repo.list_for_execution(execution_id).await
    }
}

/// Compute SHA-256 hashes for all regular files in a directory (non-recursive).
///
/// # Errors
///
/// Returns `AppError::Config` if the directory cannot be read.
pub fn hash_workspace_files(root: &Path) -> Result<HashMap<String, String>> {
    let mut hashes = HashMap::new();

    let entries = std::fs::read_dir(root)
        .map_err(|err| AppError::Config(format!("cannot read workspace directory: {err}")))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            if let Ok(content) = std::fs::read(&path) {
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string();
                hashes.insert(rel, sha256_hex(&content));
            }
        }
    }

    Ok(hashes)
}

/// Compute SHA-256 hex digest of the given bytes.
fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
