//! `SQLite` persistence layer: connection, schema, and repositories.

pub mod checkpoint_repo;
pub mod db;
pub mod execution_repo;
pub mod process_repo;
pub mod schema;
pub mod session_repo;

pub use checkpoint_repo::CheckpointRepo;
pub use db::Database;
pub use execution_repo::ExecutionRepo;
pub use process_repo::ProcessRepo;
pub use session_repo::SessionRepo;
