//! Unit tests for the shared error type.

use agent_conductor::AppError;

#[test]
fn display_prefixes_each_variant() {
    assert_eq!(
        AppError::Config("bad value".into()).to_string(),
        "config: bad value"
    );
    assert_eq!(AppError::Db("locked".into()).to_string(), "db: locked");
    assert_eq!(
        AppError::Agent("stream closed".into()).to_string(),
        "agent: stream closed"
    );
    assert_eq!(
        AppError::Decode("bad json".into()).to_string(),
        "decode: bad json"
    );
    assert_eq!(
        AppError::Process("spawn failed".into()).to_string(),
        "process: spawn failed"
    );
    assert_eq!(
        AppError::NotFound("exec-1".into()).to_string(),
        "not found: exec-1"
    );
    assert_eq!(AppError::Io("eof".into()).to_string(), "io: eof");
}

#[test]
fn converts_from_toml_error() {
    let toml_err = toml::from_str::<agent_conductor::config::GlobalConfig>("not toml [[")
        .expect_err("parse error");
    let err: AppError = toml_err.into();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn converts_from_io_error() {
    let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: AppError = io_err.into();
    assert!(matches!(err, AppError::Io(_)));
    assert!(err.to_string().contains("pipe closed"));
}

#[test]
fn converts_from_sqlx_error() {
    let err: AppError = sqlx::Error::RowNotFound.into();
    assert!(matches!(err, AppError::Db(_)));
}

#[test]
fn implements_std_error() {
    let err: Box<dyn std::error::Error> = Box::new(AppError::Agent("x".into()));
    assert!(err.source().is_none());
}
