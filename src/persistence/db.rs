//! `SQLite` connection and schema bootstrap.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::{AppError, Result};

use super::schema;

/// Alias for the shared `SQLite` pool.
pub type Database = SqlitePool;

/// Open (or create) the on-disk database and apply the schema.
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema application fails.
pub async fn connect(db_path: &Path) -> Result<Arc<Database>> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| AppError::Db(format!("failed to create db dir: {err}")))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))
        .map_err(|err| AppError::Db(format!("invalid db path: {err}")))?
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;
    schema::bootstrap_schema(&pool).await?;
    Ok(Arc::new(pool))
}

/// Open an in-memory database with the schema applied. Test backend.
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema application fails.
pub async fn connect_memory() -> Result<Arc<Database>> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|err| AppError::Db(format!("invalid memory options: {err}")))?;

    // One pinned connection: each connection to `:memory:` is its own
    // database, and an idle-reaped connection would drop the schema.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    schema::bootstrap_schema(&pool).await?;
    Ok(Arc::new(pool))
}
