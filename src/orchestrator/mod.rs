//! Execution orchestration modules.
//!
//! Covers the top-level execution coordinator, the interactive question
//! gate, and session continuity with checkpoint capture.

pub mod checkpoint_manager;
pub mod coordinator;
pub mod question_gate;
