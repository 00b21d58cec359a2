//! Integration tests for the background process registry. Unix-only: they
//! spawn real shell children and probe real PIDs.

#![cfg(unix)]

use std::time::Duration;

use tokio::sync::mpsc;

use agent_conductor::config::ProcessConfig;
use agent_conductor::models::process::{LogChannel, LogSource};
use agent_conductor::procs::registry::ProcessRegistry;
use agent_conductor::procs::ProcessEvent;

fn test_config() -> ProcessConfig {
    ProcessConfig {
        poll_interval_seconds: 1,
        stop_grace_seconds: 1,
        log_ring_capacity: 50,
    }
}

fn make_registry() -> (ProcessRegistry, mpsc::Receiver<ProcessEvent>) {
    let (tx, rx) = mpsc::channel(64);
    (ProcessRegistry::new(test_config(), tx), rx)
}

async fn next_event(rx: &mut mpsc::Receiver<ProcessEvent>) -> ProcessEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for process event")
        .expect("process event channel closed")
}

/// Wait for the `Exited` event for one process id, skipping others.
async fn wait_for_exit(
    rx: &mut mpsc::Receiver<ProcessEvent>,
    process_id: &str,
) -> (Option<i32>, Option<String>) {
    loop {
        if let ProcessEvent::Exited {
            process_id: id,
            code,
            signal,
        } = next_event(rx).await
        {
            if id == process_id {
                return (code, signal);
            }
        }
    }
}

#[tokio::test]
async fn owned_process_reports_real_exit_code() {
    let (registry, mut rx) = make_registry();
    let dir = tempfile::tempdir().expect("tempdir");

    let record = registry
        .spawn_owned("proj-1", Some("exec-1"), "exit 3", dir.path())
        .await
        .expect("spawn");
    assert_eq!(record.log_source, LogSource::OwnedPipe);

    assert!(matches!(next_event(&mut rx).await, ProcessEvent::Started { .. }));
    let (code, signal) = wait_for_exit(&mut rx, &record.id).await;
    assert_eq!(code, Some(3));
    assert!(signal.is_none());

    let stored = registry.get(&record.id).await.expect("tracked");
    assert!(stored.is_terminated());
    assert_eq!(stored.exit_code, Some(3));
}

#[tokio::test]
async fn instantly_exiting_owned_process_still_records_exit() {
    let (registry, mut rx) = make_registry();
    let dir = tempfile::tempdir().expect("tempdir");

    // The child is gone before the wait task can possibly run; the exit
    // must land on the tracked record regardless.
    let record = registry
        .spawn_owned("proj-1", Some("exec-1"), "exit 1", dir.path())
        .await
        .expect("spawn");

    assert!(matches!(next_event(&mut rx).await, ProcessEvent::Started { .. }));
    let (code, signal) = wait_for_exit(&mut rx, &record.id).await;
    assert_eq!(code, Some(1));
    assert!(signal.is_none());

    let stored = registry.get(&record.id).await.expect("tracked");
    assert_eq!(stored.exit_code, Some(1));
}

#[tokio::test]
async fn owned_process_output_lands_in_log_ring() {
    let (registry, mut rx) = make_registry();
    let dir = tempfile::tempdir().expect("tempdir");

    let record = registry
        .spawn_owned("proj-2", None, "echo out-line; echo err-line >&2", dir.path())
        .await
        .expect("spawn");

    wait_for_exit(&mut rx, &record.id).await;

    let logs = registry.logs(&record.id).await.expect("logs");
    let stdout: Vec<&str> = logs
        .iter()
        .filter(|e| e.channel == LogChannel::Stdout)
        .map(|e| e.content.as_str())
        .collect();
    let stderr: Vec<&str> = logs
        .iter()
        .filter(|e| e.channel == LogChannel::Stderr)
        .map(|e| e.content.as_str())
        .collect();
    assert_eq!(stdout, vec!["out-line"]);
    assert_eq!(stderr, vec!["err-line"]);

    assert!(registry.logs("no-such-process").await.is_none());
}

#[tokio::test]
async fn adopting_a_dead_pid_is_refused() {
    let (registry, _rx) = make_registry();

    // A child that has already been reaped leaves a dead pid behind.
    let mut child = std::process::Command::new("true").spawn().expect("spawn");
    let pid = child.id();
    child.wait().expect("wait");

    let adopted = registry
        .track_external("proj-3", None, pid, "true", None)
        .await;
    assert!(adopted.is_none());
    assert!(registry.list().await.is_empty());
}

#[tokio::test]
#[serial_test::serial]
async fn adopted_process_gets_synthesized_exit_when_it_dies() {
    let (registry, mut rx) = make_registry();

    let mut child = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("spawn sleep");
    let pid = child.id();

    let record = registry
        .track_external("proj-4", Some("exec-4"), pid, "sleep 30", None)
        .await
        .expect("adopt");
    assert!(matches!(next_event(&mut rx).await, ProcessEvent::Started { .. }));

    child.kill().expect("kill");
    child.wait().expect("wait");

    // The liveness poll synthesizes a zero exit with no signal; the real
    // status of a non-child pid is unobservable.
    let (code, signal) = wait_for_exit(&mut rx, &record.id).await;
    assert_eq!(code, Some(0));
    assert!(signal.is_none());
}

#[tokio::test]
async fn bgpid_sentinel_is_parsed_from_tool_output() {
    let (registry, _rx) = make_registry();

    let mut child = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("spawn sleep");
    let pid = child.id();

    let adopted = registry
        .adopt_from_tool_output("proj-5", "exec-5", &format!("dev server up BGPID:{pid}\n"))
        .await
        .expect("adopt");
    assert_eq!(adopted.pid, pid);
    assert_eq!(adopted.log_source, LogSource::None);

    // Text without the sentinel adopts nothing.
    let none = registry
        .adopt_from_tool_output("proj-5", "exec-5", "no pid here")
        .await;
    assert!(none.is_none());

    child.kill().expect("kill");
    child.wait().expect("wait");
}

#[tokio::test]
#[serial_test::serial]
async fn stop_terminates_an_owned_process() {
    let (registry, mut rx) = make_registry();
    let dir = tempfile::tempdir().expect("tempdir");

    let record = registry
        .spawn_owned("proj-6", None, "sleep 30", dir.path())
        .await
        .expect("spawn");
    assert!(matches!(next_event(&mut rx).await, ProcessEvent::Started { .. }));

    registry.stop(&record.id).await.expect("stop");

    let (code, signal) = wait_for_exit(&mut rx, &record.id).await;
    assert!(code.is_none());
    assert_eq!(signal.as_deref(), Some("SIGTERM"));
}

#[tokio::test]
async fn stop_of_unknown_process_is_not_found() {
    let (registry, _rx) = make_registry();
    let err = registry.stop("no-such-process").await.expect_err("error");
    assert!(matches!(err, agent_conductor::AppError::NotFound(_)));
}

#[tokio::test]
async fn restore_retracks_only_live_processes() {
    let (registry, mut rx) = make_registry();

    let mut child = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("spawn sleep");
    let pid = child.id();

    let record = agent_conductor::models::process::BackgroundProcess::new(
        "proj-7".to_owned(),
        None,
        pid,
        "sleep 30".to_owned(),
        LogSource::None,
    );
    assert!(registry.restore(record.clone()).await);
    assert!(matches!(next_event(&mut rx).await, ProcessEvent::Started { .. }));

    // A terminated record is never restored.
    let mut dead = record;
    dead.exit_code = Some(0);
    assert!(!registry.restore(dead).await);

    child.kill().expect("kill");
    child.wait().expect("wait");
}
