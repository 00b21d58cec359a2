//! Upstream agent execution API boundary.
//!
//! The [`UpstreamAgent`] trait decouples the orchestration core from the
//! concrete agent transport. The production implementation
//! ([`client::CliAgent`]) spawns the agent CLI and streams its NDJSON
//! stdout; tests inject scripted implementations of the same trait.

pub mod client;
pub mod codec;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Parameters for opening one upstream agent call.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Execution identifier, injected into the agent environment.
    pub execution_id: String,
    /// Directory the agent operates in.
    pub working_dir: PathBuf,
    /// Prompt text.
    pub prompt: String,
    /// Upstream session to resume, when continuing a logical task.
    pub resume_session: Option<String>,
    /// Auxiliary file paths referenced by the prompt.
    pub aux_files: Vec<PathBuf>,
}

/// A tool call awaiting an authorization decision.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    /// Execution the call belongs to.
    pub execution_id: String,
    /// Invoked tool name.
    pub tool_name: String,
    /// Tool-use block identifier.
    pub tool_use_id: String,
    /// Tool input as raw JSON.
    pub input: serde_json::Value,
}

/// Decision returned to the upstream agent for a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolDecision {
    /// Allow the call, optionally with answers merged into the input.
    Allow {
        /// Input to run the tool with.
        input: serde_json::Value,
    },
    /// Deny the call with a reason the agent can surface.
    Deny {
        /// Human-readable denial reason.
        reason: String,
    },
}

/// Callback invoked inline with the upstream stream for each tool call that
/// requires authorization. The callback itself may suspend indefinitely
/// (interactive questions are answered by a human).
pub trait ToolAuthorizer: Send + Sync {
    /// Decide whether the tool call may proceed.
    fn authorize(
        &self,
        request: ToolCallRequest,
    ) -> Pin<Box<dyn Future<Output = ToolDecision> + Send + '_>>;
}

/// Async sequence of tagged upstream messages.
///
/// `Ok` items are raw JSON envelopes for the normalizer; an `Err` item is an
/// iterator-level fault that terminates the execution with exit code 1.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<serde_json::Value>> + Send>>;

/// The upstream agent execution API.
pub trait UpstreamAgent: Send + Sync {
    /// Open one streaming agent call.
    ///
    /// The implementation must honor `cancel` at its suspension points and
    /// route tool authorization through `authorizer`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Agent` if the call cannot be opened at all
    /// (e.g. the CLI binary fails to spawn).
    fn open(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
        authorizer: Arc<dyn ToolAuthorizer>,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream>> + Send + '_>>;
}
