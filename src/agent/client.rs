//! Agent CLI process client.
//!
//! Production [`UpstreamAgent`] implementation: spawns the agent CLI with
//! `kill_on_drop(true)`, frames its stdout as NDJSON via [`NdjsonCodec`],
//! and yields each parsed line through the message stream. In-band
//! `control_request` messages (tool authorization) are serviced against the
//! injected [`ToolAuthorizer`] and answered on the agent's stdin instead of
//! being forwarded.

use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use futures_util::{stream, Future, StreamExt};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::codec::NdjsonCodec;
use crate::agent::{
    ExecutionRequest, MessageStream, ToolAuthorizer, ToolCallRequest, ToolDecision, UpstreamAgent,
};
use crate::config::AgentConfig;
use crate::{AppError, Result};

/// Depth of the forwarded-message channel between the reader task and the
/// consuming stream.
const STREAM_BUFFER: usize = 64;

/// [`UpstreamAgent`] backed by a spawned agent CLI process per call.
#[derive(Debug, Clone)]
pub struct CliAgent {
    config: AgentConfig,
}

impl CliAgent {
    /// Create a client from the agent CLI configuration.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, request: &ExecutionRequest) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);

        if self.config.checkpoint_replay {
            cmd.arg("--replay-checkpoints");
        }
        if let Some(ref session) = request.resume_session {
            cmd.arg("--resume").arg(session);
        }
        for file in &request.aux_files {
            cmd.arg("--file").arg(file);
        }
        cmd.arg(&request.prompt);

        cmd.env("CONDUCTOR_EXECUTION_ID", &request.execution_id)
            .current_dir(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        cmd
    }
}

impl UpstreamAgent for CliAgent {
    fn open(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
        authorizer: Arc<dyn ToolAuthorizer>,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream>> + Send + '_>> {
        Box::pin(async move {
            let mut cmd = self.build_command(&request);

            let mut child = cmd
                .spawn()
                .map_err(|err| AppError::Agent(format!("failed to spawn agent cli: {err}")))?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| AppError::Agent("failed to capture agent stdin".into()))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| AppError::Agent("failed to capture agent stdout".into()))?;

            info!(
                execution_id = request.execution_id,
                pid = child.id().unwrap_or(0),
                command = self.config.command,
                "agent cli process spawned"
            );

            // Writer task: serialises control responses onto the agent's stdin.
            let (write_tx, write_rx) = mpsc::channel::<Value>(STREAM_BUFFER);
            tokio::spawn(run_writer(
                request.execution_id.clone(),
                stdin,
                write_rx,
                cancel.clone(),
            ));

            let (msg_tx, mut msg_rx) = mpsc::channel::<Result<Value>>(STREAM_BUFFER);
            tokio::spawn(run_reader(
                request.execution_id.clone(),
                child,
                stdout,
                msg_tx,
                write_tx,
                authorizer,
                cancel,
            ));

            let stream: MessageStream =
                Box::pin(stream::poll_fn(move |cx| msg_rx.poll_recv(cx)));
            Ok(stream)
        })
    }
}

/// Reader task: frames stdout lines, services control requests, forwards
/// everything else to the message stream.
///
/// Malformed or oversized lines are logged and skipped; they never
/// terminate the stream. I/O errors and a non-zero child exit surface as an
/// `Err` item, which the coordinator treats as an iterator-level fault.
async fn run_reader(
    execution_id: String,
    mut child: Child,
    stdout: tokio::process::ChildStdout,
    msg_tx: mpsc::Sender<Result<Value>>,
    write_tx: mpsc::Sender<Value>,
    authorizer: Arc<dyn ToolAuthorizer>,
    cancel: CancellationToken,
) {
    let mut framed = FramedRead::new(stdout, NdjsonCodec::new());
    let mut clean_eof = false;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(execution_id, "agent reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(execution_id, "agent reader: EOF detected");
                        clean_eof = true;
                        break;
                    }
                    Some(Err(AppError::Agent(ref msg))) => {
                        warn!(
                            execution_id,
                            error = msg.as_str(),
                            "agent reader: codec framing error, skipping"
                        );
                    }
                    Some(Err(e)) => {
                        warn!(execution_id, error = %e, "agent reader: IO error, stopping");
                        let _ = msg_tx
                            .send(Err(AppError::Agent(format!("stream error: {e}"))))
                            .await;
                        break;
                    }
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(&line) {
                            Ok(value) => {
                                if is_control_request(&value) {
                                    service_control_request(
                                        &execution_id,
                                        value,
                                        &write_tx,
                                        &authorizer,
                                    );
                                } else if msg_tx.send(Ok(value)).await.is_err() {
                                    debug!(execution_id, "agent reader: stream closed, stopping");
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(
                                    execution_id,
                                    error = %e,
                                    "agent reader: malformed json line, skipping"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    if clean_eof {
        match child.wait().await {
            Ok(status) if status.success() => {
                debug!(execution_id, "agent cli exited cleanly");
            }
            Ok(status) => {
                let _ = msg_tx
                    .send(Err(AppError::Agent(format!(
                        "agent cli exited with status {status}"
                    ))))
                    .await;
            }
            Err(err) => {
                let _ = msg_tx
                    .send(Err(AppError::Agent(format!(
                        "failed to reap agent cli: {err}"
                    ))))
                    .await;
            }
        }
    }
    // Dropping `child` here triggers kill_on_drop for the cancel path.
}

/// Whether a parsed line is an in-band tool-authorization request.
fn is_control_request(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("control_request")
}

/// Service one `control_request` message without blocking the reader.
///
/// The authorization callback may suspend indefinitely (interactive
/// questions), so it runs in its own task; the agent itself stays blocked
/// waiting for the `control_response` line.
fn service_control_request(
    execution_id: &str,
    value: Value,
    write_tx: &mpsc::Sender<Value>,
    authorizer: &Arc<dyn ToolAuthorizer>,
) {
    let Some(request_id) = value
        .get("request_id")
        .and_then(Value::as_str)
        .map(str::to_owned)
    else {
        warn!(execution_id, "control_request without request_id, ignoring");
        return;
    };

    let request = value.get("request").cloned().unwrap_or(Value::Null);
    let call = ToolCallRequest {
        execution_id: execution_id.to_owned(),
        tool_name: request
            .get("tool_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        tool_use_id: request
            .get("tool_use_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        input: request.get("input").cloned().unwrap_or(Value::Null),
    };

    let execution_id = execution_id.to_owned();
    let write_tx = write_tx.clone();
    let authorizer = Arc::clone(authorizer);

    tokio::spawn(async move {
        let decision = authorizer.authorize(call).await;
        let response = match decision {
            ToolDecision::Allow { input } => serde_json::json!({
                "type": "control_response",
                "request_id": request_id,
                "response": { "behavior": "allow", "updated_input": input },
            }),
            ToolDecision::Deny { reason } => serde_json::json!({
                "type": "control_response",
                "request_id": request_id,
                "response": { "behavior": "deny", "message": reason },
            }),
        };
        if write_tx.send(response).await.is_err() {
            debug!(execution_id, "writer closed before control response delivery");
        }
    });
}

/// Writer task: serialises outbound JSON values as NDJSON lines on stdin.
///
/// Exits cleanly when the cancellation token fires or all senders drop.
async fn run_writer(
    execution_id: String,
    mut stdin: ChildStdin,
    mut write_rx: mpsc::Receiver<Value>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(execution_id, "agent writer: cancellation received, stopping");
                break;
            }

            msg = write_rx.recv() => {
                let Some(value) = msg else {
                    debug!(execution_id, "agent writer: channel closed, stopping");
                    break;
                };
                let mut bytes = match serde_json::to_vec(&value) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(execution_id, error = %e, "agent writer: serialise failed, dropping");
                        continue;
                    }
                };
                bytes.push(b'\n');
                if let Err(e) = stdin.write_all(&bytes).await {
                    warn!(execution_id, error = %e, "agent writer: write to stdin failed");
                    break;
                }
            }
        }
    }
}
