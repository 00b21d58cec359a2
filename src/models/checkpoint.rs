//! Checkpoint model for execution rewind points.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted rewind point linking an execution to a resumable state marker.
///
/// Two rewind mechanisms are layered in one row: `snapshot_ref` is the
/// in-band upstream checkpoint marker governing conversational state, while
/// `file_hashes` is the pre-start workspace snapshot governing filesystem
/// state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Checkpoint {
    /// Unique record identifier.
    pub id: String,
    /// Execution this checkpoint was taken from.
    pub execution_id: String,
    /// Upstream session the execution ran under.
    pub session_id: String,
    /// Upstream checkpoint marker captured from the message stream.
    pub snapshot_ref: String,
    /// Map of relative file path to SHA-256 hash, taken before the
    /// execution started.
    pub file_hashes: HashMap<String, String>,
    /// Number of canonical events emitted by the execution.
    pub message_count: u64,
    /// Optional human-readable summary of the execution.
    pub summary: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Construct a new checkpoint with a generated identifier.
    #[must_use]
    pub fn new(
        execution_id: String,
        session_id: String,
        snapshot_ref: String,
        file_hashes: HashMap<String, String>,
        message_count: u64,
        summary: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            execution_id,
            session_id,
            snapshot_ref,
            file_hashes,
            message_count,
            summary,
            created_at: Utc::now(),
        }
    }
}
