//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, safe to
//! re-run on every startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// Creates all four tables idempotently. Safe to call on every startup.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS execution (
    id              TEXT PRIMARY KEY NOT NULL,
    task_id         TEXT NOT NULL,
    working_dir     TEXT NOT NULL,
    prompt          TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('running','completed','failed','cancelled')),
    session_id      TEXT,
    started_at      TEXT NOT NULL,
    completed_at    TEXT
);

CREATE TABLE IF NOT EXISTS task_session (
    task_id         TEXT PRIMARY KEY NOT NULL,
    session_id      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoint (
    id              TEXT PRIMARY KEY NOT NULL,
    execution_id    TEXT NOT NULL,
    session_id      TEXT NOT NULL,
    snapshot_ref    TEXT NOT NULL,
    file_hashes     TEXT NOT NULL,
    message_count   INTEGER NOT NULL DEFAULT 0,
    summary         TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS background_process (
    id              TEXT PRIMARY KEY NOT NULL,
    project_id      TEXT NOT NULL,
    execution_id    TEXT,
    pid             INTEGER NOT NULL,
    command         TEXT NOT NULL,
    started_at      TEXT NOT NULL,
    exit_code       INTEGER,
    exit_signal     TEXT,
    log_source      TEXT NOT NULL CHECK(log_source IN ('owned_pipe','log_file','none')),
    log_path        TEXT
);

CREATE INDEX IF NOT EXISTS idx_execution_task ON execution(task_id);
CREATE INDEX IF NOT EXISTS idx_checkpoint_execution ON checkpoint(execution_id);
CREATE INDEX IF NOT EXISTS idx_process_project ON background_process(project_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
