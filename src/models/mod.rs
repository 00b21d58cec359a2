//! Domain model module declarations.

pub mod checkpoint;
pub mod execution;
pub mod process;
pub mod question;
