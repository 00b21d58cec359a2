//! Unit tests for domain model lifecycle helpers.

use std::collections::HashMap;

use agent_conductor::models::checkpoint::Checkpoint;
use agent_conductor::models::execution::{Execution, ExecutionStatus, SessionRecord};
use agent_conductor::models::process::{BackgroundProcess, LogSource};

fn sample_execution() -> Execution {
    Execution::new(
        "exec-1".to_owned(),
        "task-1".to_owned(),
        "/tmp/work".to_owned(),
        "do the thing".to_owned(),
    )
}

#[test]
fn new_execution_starts_running() {
    let execution = sample_execution();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert!(execution.session_id.is_none());
    assert!(execution.completed_at.is_none());
}

#[test]
fn running_transitions_to_any_terminal_status() {
    let execution = sample_execution();
    assert!(execution.can_transition_to(ExecutionStatus::Completed));
    assert!(execution.can_transition_to(ExecutionStatus::Failed));
    assert!(execution.can_transition_to(ExecutionStatus::Cancelled));
    assert!(!execution.can_transition_to(ExecutionStatus::Running));
}

#[test]
fn terminal_statuses_never_revert() {
    let mut execution = sample_execution();
    execution.status = ExecutionStatus::Completed;

    assert!(!execution.can_transition_to(ExecutionStatus::Running));
    assert!(!execution.can_transition_to(ExecutionStatus::Failed));
    assert!(!execution.can_transition_to(ExecutionStatus::Cancelled));
}

#[test]
fn status_terminality() {
    assert!(!ExecutionStatus::Running.is_terminal());
    assert!(ExecutionStatus::Completed.is_terminal());
    assert!(ExecutionStatus::Failed.is_terminal());
    assert!(ExecutionStatus::Cancelled.is_terminal());
}

#[test]
fn background_process_terminates_on_exit_code() {
    let mut process = BackgroundProcess::new(
        "proj-1".to_owned(),
        Some("exec-1".to_owned()),
        4242,
        "npm run dev".to_owned(),
        LogSource::None,
    );
    assert!(!process.is_terminated());

    process.exit_code = Some(0);
    assert!(process.is_terminated());
}

#[test]
fn background_process_terminates_on_signal_alone() {
    let mut process = BackgroundProcess::new(
        "proj-1".to_owned(),
        None,
        4243,
        "sleep 100".to_owned(),
        LogSource::OwnedPipe,
    );

    process.exit_signal = Some("SIGKILL".to_owned());
    assert!(process.is_terminated());
    assert!(process.exit_code.is_none());
}

#[test]
fn checkpoint_new_generates_unique_ids() {
    let make = || {
        Checkpoint::new(
            "exec-1".to_owned(),
            "sess-1".to_owned(),
            "ckpt-marker".to_owned(),
            HashMap::new(),
            10,
            Some("summary".to_owned()),
        )
    };

    let a = make();
    let b = make();
    assert_ne!(a.id, b.id);
    assert_eq!(a.execution_id, "exec-1");
    assert_eq!(a.snapshot_ref, "ckpt-marker");
    assert_eq!(a.message_count, 10);
}

#[test]
fn session_record_carries_latest_mapping() {
    let record = SessionRecord::new("task-9".to_owned(), "sess-9".to_owned());
    assert_eq!(record.task_id, "task-9");
    assert_eq!(record.session_id, "sess-9");
}
