//! Background process model and per-process log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a tracked process's recorded output comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// The registry owns the process's stdio pipes (spawn-and-own path).
    OwnedPipe,
    /// Output is read from a known log file (adopt-by-pid path).
    LogFile(String),
    /// No output source is available.
    None,
}

/// A detached OS process tracked independently of any execution's lifetime.
///
/// Terminal once an exit code or signal is recorded; never reverts to
/// running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BackgroundProcess {
    /// Unique record identifier.
    pub id: String,
    /// Project the process belongs to.
    pub project_id: String,
    /// Execution whose tool call started the process, when known.
    pub execution_id: Option<String>,
    /// OS process identifier.
    pub pid: u32,
    /// Command line the process was started with.
    pub command: String,
    /// Start (or adoption) timestamp.
    pub started_at: DateTime<Utc>,
    /// Exit code, set once the process terminates.
    pub exit_code: Option<i32>,
    /// Terminating signal name, if the process was killed by a signal.
    pub exit_signal: Option<String>,
    /// Where recorded output comes from.
    pub log_source: LogSource,
}

impl BackgroundProcess {
    /// Construct a tracked process record with a generated identifier.
    #[must_use]
    pub fn new(
        project_id: String,
        execution_id: Option<String>,
        pid: u32,
        command: String,
        log_source: LogSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id,
            execution_id,
            pid,
            command,
            started_at: Utc::now(),
            exit_code: None,
            exit_signal: None,
            log_source,
        }
    }

    /// Whether the process has reached a terminal state.
    ///
    /// A signal-killed process carries no exit code, only a signal name.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.exit_code.is_some() || self.exit_signal.is_some()
    }
}

/// Output channel a log line was read from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogChannel {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One recorded output line from a tracked process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LogEntry {
    /// Channel the line arrived on.
    pub channel: LogChannel,
    /// Line content without the trailing newline.
    pub content: String,
    /// When the line was recorded.
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Construct a log entry stamped with the current time.
    #[must_use]
    pub fn new(channel: LogChannel, content: String) -> Self {
        Self {
            channel,
            content,
            timestamp: Utc::now(),
        }
    }
}
