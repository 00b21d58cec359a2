//! Integration tests for the checkpoint manager over an in-memory database.

use std::sync::Arc;

use agent_conductor::orchestrator::checkpoint_manager::{hash_workspace_files, CheckpointManager};
use agent_conductor::persistence::{db, CheckpointRepo, SessionRepo};

async fn make_manager() -> CheckpointManager {
    let pool = db::connect_memory().await.expect("db");
    CheckpointManager::new(
        CheckpointRepo::new(Arc::clone(&pool)),
        SessionRepo::new(pool),
    )
}

#[tokio::test]
async fn save_without_marker_is_a_noop() {
    let manager = make_manager().await;

    let saved = manager
        .save_checkpoint("exec-1", "sess-1", 5, None)
        .await
        .expect("save");
    assert!(saved.is_none());
    assert!(manager.list_checkpoints("exec-1").await.expect("list").is_empty());
}

#[tokio::test]
async fn latest_marker_wins_and_commit_clears_the_slot() {
    let manager = make_manager().await;

    manager.capture_marker("exec-2", "marker-old".to_owned()).await;
    manager.capture_marker("exec-2", "marker-new".to_owned()).await;

    let saved = manager
        .save_checkpoint("exec-2", "sess-2", 12, Some("built the feature".to_owned()))
        .await
        .expect("save")
        .expect("checkpoint");
    assert_eq!(saved.snapshot_ref, "marker-new");
    assert_eq!(saved.message_count, 12);
    assert_eq!(saved.summary.as_deref(), Some("built the feature"));

    // The marker slot is consumed by the commit.
    let again = manager
        .save_checkpoint("exec-2", "sess-2", 12, None)
        .await
        .expect("save");
    assert!(again.is_none());

    let listed = manager.list_checkpoints("exec-2").await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, saved.id);
}

#[tokio::test]
async fn workspace_snapshot_is_committed_with_the_checkpoint() {
    let manager = make_manager().await;
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), b"alpha").expect("write");
    std::fs::write(dir.path().join("b.txt"), b"beta").expect("write");

    let count = manager
        .snapshot_workspace("exec-3", dir.path())
        .await
        .expect("snapshot");
    assert_eq!(count, 2);

    manager.capture_marker("exec-3", "marker-3".to_owned()).await;
    let saved = manager
        .save_checkpoint("exec-3", "sess-3", 3, None)
        .await
        .expect("save")
        .expect("checkpoint");

    assert_eq!(saved.file_hashes.len(), 2);
    assert!(saved.file_hashes.contains_key("a.txt"));
    assert!(saved.file_hashes.contains_key("b.txt"));
}

#[tokio::test]
async fn discard_drops_marker_and_snapshot() {
    let manager = make_manager().await;
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), b"alpha").expect("write");

    manager
        .snapshot_workspace("exec-4", dir.path())
        .await
        .expect("snapshot");
    manager.capture_marker("exec-4", "marker-4".to_owned()).await;
    manager.discard("exec-4").await;

    let saved = manager
        .save_checkpoint("exec-4", "sess-4", 1, None)
        .await
        .expect("save");
    assert!(saved.is_none());
}

#[tokio::test]
async fn session_records_resume_the_latest_session() {
    let manager = make_manager().await;

    assert!(manager.resume_options("task-1").await.expect("query").is_none());

    manager.record_session("task-1", "sess-a").await.expect("record");
    manager.record_session("task-1", "sess-b").await.expect("record");

    let resumed = manager.resume_options("task-1").await.expect("query");
    assert_eq!(resumed.as_deref(), Some("sess-b"));
}

#[test]
fn workspace_hashing_is_deterministic_and_content_sensitive() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("f.txt"), b"one").expect("write");

    let first = hash_workspace_files(dir.path()).expect("hash");
    let second = hash_workspace_files(dir.path()).expect("hash");
    assert_eq!(first, second);

    std::fs::write(dir.path().join("f.txt"), b"two").expect("write");
    let third = hash_workspace_files(dir.path()).expect("hash");
    assert_ne!(first.get("f.txt"), third.get("f.txt"));
}

#[test]
fn workspace_hashing_fails_on_missing_directory() {
    let err = hash_workspace_files(std::path::Path::new("/no/such/dir")).expect_err("error");
    assert!(matches!(err, agent_conductor::AppError::Config(_)));
}
