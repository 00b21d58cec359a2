//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Upstream agent CLI invocation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent CLI binary (e.g. `claude`).
    pub command: String,
    /// Default arguments passed to the CLI before per-execution flags.
    #[serde(default)]
    pub args: Vec<String>,
    /// Whether in-band checkpoint replay markers are requested upstream.
    #[serde(default)]
    pub checkpoint_replay: bool,
}

/// Background process tracking settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessConfig {
    /// Interval in seconds between liveness probes for adopted processes.
    #[serde(default = "default_poll_seconds")]
    pub poll_interval_seconds: u64,
    /// Grace period in seconds between SIGTERM and SIGKILL when stopping.
    #[serde(default = "default_grace_seconds")]
    pub stop_grace_seconds: u64,
    /// Capacity of each per-process output log ring.
    #[serde(default = "default_ring_capacity")]
    pub log_ring_capacity: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_seconds(),
            stop_grace_seconds: default_grace_seconds(),
            log_ring_capacity: default_ring_capacity(),
        }
    }
}

fn default_poll_seconds() -> u64 {
    5
}

fn default_grace_seconds() -> u64 {
    5
}

fn default_ring_capacity() -> usize {
    1000
}

fn default_max_concurrent_executions() -> u32 {
    8
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Default working directory for executions that do not supply one.
    pub default_working_dir: PathBuf,
    /// Upstream agent CLI settings.
    pub agent: AgentConfig,
    /// Background process tracking settings.
    #[serde(default)]
    pub process: ProcessConfig,
    /// Maximum concurrently running executions.
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: u32,
    /// Optional explicit `SQLite` database path; derived from the working
    /// directory when absent.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Derived path for the persisted `SQLite` database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| {
            self.default_working_dir
                .join(".agent-conductor")
                .join("conductor.db")
        })
    }

    fn validate(&mut self) -> Result<()> {
        if self.max_concurrent_executions == 0 {
            return Err(AppError::Config(
                "max_concurrent_executions must be greater than zero".into(),
            ));
        }

        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }

        if self.process.log_ring_capacity == 0 {
            return Err(AppError::Config(
                "process.log_ring_capacity must be greater than zero".into(),
            ));
        }

        let canonical = self
            .default_working_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("default_working_dir invalid: {err}")))?;
        self.default_working_dir = canonical;

        Ok(())
    }
}
