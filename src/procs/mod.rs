//! Background process tracking.
//!
//! Detached OS processes whose lifetime is independent of any execution:
//! spawned and owned by the registry (stdio captured), or adopted by PID
//! from an execution's tool output via the `BGPID:<pid>` sentinel
//! convention. Each tracked process records its recent output in a
//! fixed-capacity [`log_ring::LogRing`].

pub mod log_ring;
pub mod registry;

/// Events emitted by the registry for subscriber handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A process entered tracking (spawned, adopted, or restored).
    Started {
        /// Registry identifier.
        process_id: String,
        /// OS process identifier.
        pid: u32,
        /// Command line, when known.
        command: String,
    },
    /// A tracked process reached a terminal state.
    Exited {
        /// Registry identifier.
        process_id: String,
        /// Exit code; adopted processes synthesize `0` on probe failure.
        code: Option<i32>,
        /// Terminating signal name, if killed by a signal.
        signal: Option<String>,
    },
}
