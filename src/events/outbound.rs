//! Outward event envelopes.
//!
//! The coordinator is effect-free beyond the upstream call and its own
//! registries: every persistence write and transport push happens in
//! external subscribers consuming this typed channel.

use serde::Serialize;

use crate::events::canonical::CanonicalEvent;
use crate::models::question::Question;

/// Event pushed to transport and persistence subscribers.
///
/// Per-execution envelopes are emitted strictly in upstream arrival order;
/// no cross-execution ordering is guaranteed.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// An execution entered the running registry.
    ExecutionStarted {
        /// Execution identifier.
        execution_id: String,
        /// Logical task the execution belongs to.
        task_id: String,
        /// Working directory the agent operates in.
        working_dir: String,
        /// Prompt text.
        prompt: String,
    },
    /// One normalized upstream message.
    ExecutionEvent {
        /// Execution identifier.
        execution_id: String,
        /// Canonical event payload.
        event: CanonicalEvent,
    },
    /// The upstream session id was captured for this execution.
    SessionCaptured {
        /// Execution identifier.
        execution_id: String,
        /// Upstream session identifier.
        session_id: String,
    },
    /// A structured question awaits an operator answer.
    QuestionPrompt {
        /// Execution identifier.
        execution_id: String,
        /// Tool-use id the answer must reference.
        tool_use_id: String,
        /// Questions to present.
        questions: Vec<Question>,
    },
    /// A background process was discovered via the PID sentinel convention.
    ProcessDiscovered {
        /// Execution whose tool output reported the process.
        execution_id: String,
        /// Registry identifier for the tracked process.
        process_id: String,
        /// Command line of the process.
        command: String,
    },
    /// A fatal upstream stream error (precedes the exit envelope).
    ExecutionError {
        /// Execution identifier.
        execution_id: String,
        /// Error description.
        message: String,
    },
    /// Terminal exit for an execution.
    ///
    /// `code` is `Some(0)` on success, `Some(1)` on a genuine error, and
    /// `None` when the caller cancelled.
    ExecutionExit {
        /// Execution identifier.
        execution_id: String,
        /// Terminal exit code.
        code: Option<i32>,
    },
}
