//! Integration tests for the `SQLite` repositories over in-memory databases.

use std::collections::HashMap;
use std::sync::Arc;

use agent_conductor::models::checkpoint::Checkpoint;
use agent_conductor::models::execution::{Execution, ExecutionStatus, SessionRecord};
use agent_conductor::models::process::{BackgroundProcess, LogSource};
use agent_conductor::persistence::{
    db, CheckpointRepo, Database, ExecutionRepo, ProcessRepo, SessionRepo,
};

async fn memory_db() -> Arc<Database> {
    db::connect_memory().await.expect("db")
}

fn sample_execution(id: &str) -> Execution {
    Execution::new(
        id.to_owned(),
        "task-1".to_owned(),
        "/tmp/work".to_owned(),
        "build it".to_owned(),
    )
}

#[tokio::test]
async fn execution_roundtrips_all_fields() {
    let repo = ExecutionRepo::new(memory_db().await);

    let execution = sample_execution("exec-1");
    repo.create(&execution).await.expect("create");

    let loaded = repo.get_by_id("exec-1").await.expect("query").expect("row");
    assert_eq!(loaded.task_id, "task-1");
    assert_eq!(loaded.working_dir, "/tmp/work");
    assert_eq!(loaded.prompt, "build it");
    assert_eq!(loaded.status, ExecutionStatus::Running);
    assert!(loaded.session_id.is_none());
    assert!(loaded.completed_at.is_none());
}

#[tokio::test]
async fn execution_get_missing_returns_none() {
    let repo = ExecutionRepo::new(memory_db().await);
    assert!(repo.get_by_id("nope").await.expect("query").is_none());
}

#[tokio::test]
async fn first_recorded_session_id_is_immutable() {
    let repo = ExecutionRepo::new(memory_db().await);
    repo.create(&sample_execution("exec-2")).await.expect("create");

    repo.set_session_id("exec-2", "sess-first").await.expect("set");
    repo.set_session_id("exec-2", "sess-second").await.expect("set");

    let loaded = repo.get_by_id("exec-2").await.expect("query").expect("row");
    assert_eq!(loaded.session_id.as_deref(), Some("sess-first"));
}

#[tokio::test]
async fn terminal_status_update_stamps_completion_time() {
    let repo = ExecutionRepo::new(memory_db().await);
    repo.create(&sample_execution("exec-3")).await.expect("create");

    repo.update_status("exec-3", ExecutionStatus::Completed)
        .await
        .expect("update");

    let loaded = repo.get_by_id("exec-3").await.expect("query").expect("row");
    assert_eq!(loaded.status, ExecutionStatus::Completed);
    assert!(loaded.completed_at.is_some());
}

#[tokio::test]
async fn list_running_excludes_terminal_rows() {
    let repo = ExecutionRepo::new(memory_db().await);
    repo.create(&sample_execution("exec-4a")).await.expect("create");
    repo.create(&sample_execution("exec-4b")).await.expect("create");
    repo.update_status("exec-4b", ExecutionStatus::Failed)
        .await
        .expect("update");

    let running = repo.list_running().await.expect("list");
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, "exec-4a");
}

#[tokio::test]
async fn session_upsert_latest_wins() {
    let repo = SessionRepo::new(memory_db().await);

    repo.upsert(&SessionRecord::new("task-1".to_owned(), "sess-a".to_owned()))
        .await
        .expect("upsert");
    repo.upsert(&SessionRecord::new("task-1".to_owned(), "sess-b".to_owned()))
        .await
        .expect("upsert");

    let loaded = repo.get("task-1").await.expect("query").expect("row");
    assert_eq!(loaded.session_id, "sess-b");
    assert!(repo.get("task-2").await.expect("query").is_none());
}

#[tokio::test]
async fn checkpoint_roundtrips_file_hashes() {
    let repo = CheckpointRepo::new(memory_db().await);

    let mut hashes = HashMap::new();
    hashes.insert("src/main.rs".to_owned(), "abc123".to_owned());
    let checkpoint = Checkpoint::new(
        "exec-5".to_owned(),
        "sess-5".to_owned(),
        "marker-5".to_owned(),
        hashes,
        7,
        Some("did things".to_owned()),
    );
    repo.create(&checkpoint).await.expect("create");

    let loaded = repo
        .get_by_id(&checkpoint.id)
        .await
        .expect("query")
        .expect("row");
    assert_eq!(loaded.snapshot_ref, "marker-5");
    assert_eq!(loaded.message_count, 7);
    assert_eq!(
        loaded.file_hashes.get("src/main.rs").map(String::as_str),
        Some("abc123")
    );
}

#[tokio::test]
async fn checkpoints_list_per_execution() {
    let repo = CheckpointRepo::new(memory_db().await);

    for (exec, marker) in [("exec-6", "m1"), ("exec-6", "m2"), ("exec-7", "m3")] {
        let checkpoint = Checkpoint::new(
            exec.to_owned(),
            "sess".to_owned(),
            marker.to_owned(),
            HashMap::new(),
            0,
            None,
        );
        repo.create(&checkpoint).await.expect("create");
    }

    let listed = repo.list_for_execution("exec-6").await.expect("list");
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|c| c.execution_id == "exec-6"));
}

#[tokio::test]
async fn process_roundtrips_log_source() {
    let repo = ProcessRepo::new(memory_db().await);

    let process = BackgroundProcess::new(
        "proj-1".to_owned(),
        Some("exec-8".to_owned()),
        4242,
        "npm run dev".to_owned(),
        LogSource::LogFile("/tmp/dev.log".to_owned()),
    );
    repo.create(&process).await.expect("create");

    let loaded = repo
        .get_by_id(&process.id)
        .await
        .expect("query")
        .expect("row");
    assert_eq!(loaded.pid, 4242);
    assert_eq!(loaded.log_source, LogSource::LogFile("/tmp/dev.log".to_owned()));
    assert!(!loaded.is_terminated());
}

#[tokio::test]
async fn process_exit_is_monotonic() {
    let repo = ProcessRepo::new(memory_db().await);

    let process = BackgroundProcess::new(
        "proj-2".to_owned(),
        None,
        100,
        "sleep 5".to_owned(),
        LogSource::None,
    );
    repo.create(&process).await.expect("create");

    repo.mark_exited(&process.id, None, Some("SIGTERM"))
        .await
        .expect("mark");
    // A later write never overwrites the first terminal state.
    repo.mark_exited(&process.id, Some(0), None).await.expect("mark");

    let loaded = repo
        .get_by_id(&process.id)
        .await
        .expect("query")
        .expect("row");
    assert!(loaded.exit_code.is_none());
    assert_eq!(loaded.exit_signal.as_deref(), Some("SIGTERM"));
}

#[tokio::test]
async fn list_active_excludes_terminated_processes() {
    let repo = ProcessRepo::new(memory_db().await);

    let live = BackgroundProcess::new(
        "proj-3".to_owned(),
        None,
        200,
        "sleep 30".to_owned(),
        LogSource::None,
    );
    let dead = BackgroundProcess::new(
        "proj-3".to_owned(),
        None,
        201,
        "true".to_owned(),
        LogSource::None,
    );
    repo.create(&live).await.expect("create");
    repo.create(&dead).await.expect("create");
    repo.mark_exited(&dead.id, Some(0), None).await.expect("mark");

    let active = repo.list_active().await.expect("list");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, live.id);

    let all = repo.list_for_project("proj-3").await.expect("list");
    assert_eq!(all.len(), 2);
}
