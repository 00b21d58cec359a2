//! Execution model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status for an agent execution.
///
/// Terminal once the status leaves `Running`; no transition ever leads
/// back to `Running`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Execution stream is being driven.
    Running,
    /// Upstream stream ended without error.
    Completed,
    /// Upstream stream ended with a fatal error.
    Failed,
    /// Execution was cancelled by the caller.
    Cancelled,
}

impl ExecutionStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One run of the agent against a prompt in a working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Execution {
    /// Caller-supplied execution identifier, unique among live executions.
    pub id: String,
    /// Logical task this execution belongs to.
    pub task_id: String,
    /// Directory the agent operates in.
    pub working_dir: String,
    /// Prompt text the execution was started with.
    pub prompt: String,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// Upstream session identifier, captured from the first session-bearing
    /// message and immutable afterwards.
    pub session_id: Option<String>,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Completion timestamp, set once the status becomes terminal.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Construct a new running execution record.
    #[must_use]
    pub fn new(id: String, task_id: String, working_dir: String, prompt: String) -> Self {
        Self {
            id,
            task_id,
            working_dir,
            prompt,
            status: ExecutionStatus::Running,
            session_id: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// Only `Running → {Completed, Failed, Cancelled}` is allowed; terminal
    /// statuses never revert.
    #[must_use]
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        self.status == ExecutionStatus::Running && next.is_terminal()
    }
}

/// The most recent upstream session id for a logical task.
///
/// Lets the next execution for the same task resume the same upstream
/// conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionRecord {
    /// Logical task identifier.
    pub task_id: String,
    /// Latest upstream session identifier for the task.
    pub session_id: String,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Construct a session record stamped with the current time.
    #[must_use]
    pub fn new(task_id: String, session_id: String) -> Self {
        Self {
            task_id,
            session_id,
            updated_at: Utc::now(),
        }
    }
}
