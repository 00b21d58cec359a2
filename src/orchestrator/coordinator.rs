//! Execution coordinator.
//!
//! Top-level owner of running executions. Each `start` opens one upstream
//! agent call under a cooperative cancellation token, drives its message
//! stream through the normalizer, the checkpoint manager, and the question
//! gate, and re-emits canonical events on the typed outbound channel. The
//! coordinator performs no persistence or transport side effects of its
//! own beyond the upstream call and its registries; subscribers consume
//! the outbound channel for that.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::agent::{ExecutionRequest, UpstreamAgent};
use crate::events::canonical::{CanonicalEvent, ContentBlock};
use crate::events::normalizer::{normalize, Normalized};
use crate::events::outbound::OutboundEvent;
use crate::models::question::QuestionSignal;
use crate::orchestrator::checkpoint_manager::CheckpointManager;
use crate::orchestrator::question_gate::QuestionGate;
use crate::procs::registry::ProcessRegistry;

/// Parameters for starting one execution.
#[derive(Debug, Clone)]
pub struct StartExecution {
    /// Caller-supplied execution identifier, unique among live executions.
    pub execution_id: String,
    /// Logical task the execution belongs to.
    pub task_id: String,
    /// Directory the agent operates in.
    pub working_dir: PathBuf,
    /// Prompt text.
    pub prompt: String,
    /// Upstream session to resume, when continuing the task's conversation.
    pub resume_session: Option<String>,
    /// Auxiliary file paths referenced by the prompt.
    pub aux_files: Vec<PathBuf>,
}

/// Registry entry for one live execution.
struct ExecutionHandle {
    cancel: CancellationToken,
}

/// How an execution's stream loop ended.
enum Outcome {
    Completed,
    Failed(crate::AppError),
    Cancelled,
}

/// Top-level owner of running executions.
///
/// Constructed once and injected; multiple independent instances can exist
/// (tests rely on this). The execution map is the only cross-execution
/// mutable state and is mutex-guarded.
pub struct Coordinator {
    agent: Arc<dyn UpstreamAgent>,
    gate: Arc<QuestionGate>,
    checkpoints: Arc<CheckpointManager>,
    registry: Arc<ProcessRegistry>,
    outbound: mpsc::Sender<OutboundEvent>,
    executions: Mutex<HashMap<String, ExecutionHandle>>,
    max_concurrent: usize,
}

impl Coordinator {
    /// Create a coordinator over its collaborators.
    #[must_use]
    pub fn new(
        agent: Arc<dyn UpstreamAgent>,
        gate: Arc<QuestionGate>,
        checkpoints: Arc<CheckpointManager>,
        registry: Arc<ProcessRegistry>,
        outbound: mpsc::Sender<OutboundEvent>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            agent,
            gate,
            checkpoints,
            registry,
            outbound,
            executions: Mutex::new(HashMap::new()),
            max_concurrent,
        }
    }

    /// Access the question gate shared with the upstream authorizer.
    #[must_use]
    pub fn gate(&self) -> &Arc<QuestionGate> {
        &self.gate
    }

    /// Access the checkpoint manager.
    #[must_use]
    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    /// Start an execution.
    ///
    /// Fails silently toward the caller when `execution_id` is already
    /// running (logged warning, no-op): the real result is delivered
    /// asynchronously as the stream of emitted events, not a return value.
    pub async fn start(self: &Arc<Self>, request: StartExecution) {
        let cancel = {
            let mut executions = self.executions.lock().await;
            if executions.contains_key(&request.execution_id) {
                warn!(
                    execution_id = request.execution_id,
                    "execution already running, ignoring duplicate start"
                );
                return;
            }
            if executions.len() >= self.max_concurrent {
                warn!(
                    execution_id = request.execution_id,
                    running = executions.len(),
                    limit = self.max_concurrent,
                    "concurrent execution limit reached, ignoring start"
                );
                return;
            }

            let cancel = CancellationToken::new();
            executions.insert(
                request.execution_id.clone(),
                ExecutionHandle {
                    cancel: cancel.clone(),
                },
            );
            cancel
        };

        info!(
            execution_id = request.execution_id,
            task_id = request.task_id,
            "execution started"
        );
        self.emit(OutboundEvent::ExecutionStarted {
            execution_id: request.execution_id.clone(),
            task_id: request.task_id.clone(),
            working_dir: request.working_dir.to_string_lossy().into_owned(),
            prompt: request.prompt.clone(),
        })
        .await;

        let this = Arc::clone(self);
        let span = info_span!("execution", execution_id = request.execution_id);
        tokio::spawn(
            async move {
                this.run_execution(request, cancel).await;
            }
            .instrument(span),
        );
    }

    /// Cancel a running execution.
    ///
    /// Idempotent: triggers the cancellation token, force-resolves any
    /// pending question with a deny decision, discards the ephemeral
    /// checkpoint slot, and removes the registry entry. Returns `false`
    /// when no such execution exists.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        let handle = self.executions.lock().await.remove(execution_id);
        let Some(handle) = handle else {
            return false;
        };

        info!(execution_id, "execution cancel requested");
        handle.cancel.cancel();
        self.gate.cancel(execution_id).await;
        self.checkpoints.discard(execution_id).await;
        true
    }

    /// Best-effort bulk cancel for host shutdown.
    pub async fn cancel_all(&self) {
        let ids: Vec<String> = self.executions.lock().await.keys().cloned().collect();
        for id in ids {
            self.cancel(&id).await;
        }
    }

    /// Whether an execution is currently live in the registry.
    pub async fn is_running(&self, execution_id: &str) -> bool {
        self.executions.lock().await.contains_key(execution_id)
    }

    /// Identifiers of all live executions.
    pub async fn running(&self) -> Vec<String> {
        self.executions.lock().await.keys().cloned().collect()
    }

    /// Resolve a pending question with the operator's answers.
    ///
    /// Returns `false` when nothing is pending for `execution_id`.
    pub async fn answer_question(
        &self,
        execution_id: &str,
        answers: HashMap<String, String>,
    ) -> bool {
        self.gate.answer(execution_id, answers).await
    }

    /// Deny a pending question without cancelling the execution.
    pub async fn cancel_question(&self, execution_id: &str) -> bool {
        self.gate.cancel(execution_id).await
    }

    // ── Stream loop ──────────────────────────────────────────────────────

    async fn run_execution(self: Arc<Self>, request: StartExecution, cancel: CancellationToken) {
        let execution_id = request.execution_id.clone();

        // Filesystem-level rewind point, taken before the agent can touch
        // the workspace. Best effort.
        if let Err(err) = self
            .checkpoints
            .snapshot_workspace(&execution_id, &request.working_dir)
            .await
        {
            warn!(execution_id, %err, "workspace snapshot failed, continuing");
        }

        let upstream_request = ExecutionRequest {
            execution_id: execution_id.clone(),
            working_dir: request.working_dir.clone(),
            prompt: request.prompt.clone(),
            resume_session: request.resume_session.clone(),
            aux_files: request.aux_files.clone(),
        };

        let authorizer: Arc<dyn crate::agent::ToolAuthorizer> = Arc::clone(&self.gate) as _;
        let opened = self
            .agent
            .open(upstream_request, cancel.clone(), authorizer)
            .await;

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                warn!(execution_id, %err, "failed to open upstream agent call");
                self.finish(&request, Outcome::Failed(err), None, 0, None)
                    .await;
                return;
            }
        };

        let mut session_id: Option<String> = None;
        let mut message_count: u64 = 0;
        let mut summary: Option<String> = None;

        let outcome = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!(execution_id, "execution cancelled mid-stream");
                    break Outcome::Cancelled;
                }

                item = stream.next() => {
                    match item {
                        None => break Outcome::Completed,
                        Some(Err(err)) => break Outcome::Failed(err),
                        Some(Ok(value)) => {
                            // Per-message fault isolation: a decode error on
                            // one message never terminates the stream.
                            match normalize(&value) {
                                Ok(normalized) => {
                                    message_count += 1;
                                    self.handle_message(
                                        &request,
                                        normalized,
                                        &cancel,
                                        &mut session_id,
                                        &mut summary,
                                    )
                                    .await;
                                }
                                Err(err) => {
                                    warn!(
                                        execution_id,
                                        %err,
                                        "skipping undecodable upstream message"
                                    );
                                }
                            }
                        }
                    }
                }
            }
        };

        self.finish(&request, outcome, session_id, message_count, summary)
            .await;
    }

    /// Route one normalized message: side channels first, then the
    /// canonical event, strictly in arrival order.
    async fn handle_message(
        &self,
        request: &StartExecution,
        normalized: Normalized,
        cancel: &CancellationToken,
        session_id: &mut Option<String>,
        summary: &mut Option<String>,
    ) {
        let execution_id = &request.execution_id;
        let Normalized {
            event,
            session_id: message_session,
            checkpoint_marker,
            question,
        } = normalized;

        // First session-bearing message wins; later ids never override.
        if session_id.is_none() {
            if let Some(sid) = message_session {
                *session_id = Some(sid.clone());
                self.emit(OutboundEvent::SessionCaptured {
                    execution_id: execution_id.clone(),
                    session_id: sid.clone(),
                })
                .await;

                // Best-effort continuity write, bracketed by token checks:
                // skipped once cancelled, and message handling stops if
                // cancellation fired during the write itself.
                if !cancel.is_cancelled() {
                    if let Err(err) = self
                        .checkpoints
                        .record_session(&request.task_id, &sid)
                        .await
                    {
                        warn!(execution_id, %err, "failed to record session, continuing");
                    }
                    if cancel.is_cancelled() {
                        return;
                    }
                }
            }
        }

        if let Some(marker) = checkpoint_marker {
            self.checkpoints.capture_marker(execution_id, marker).await;
        }

        if let Some(QuestionSignal {
            tool_use_id,
            questions,
        }) = question
        {
            self.emit(OutboundEvent::QuestionPrompt {
                execution_id: execution_id.clone(),
                tool_use_id,
                questions,
            })
            .await;
        }

        self.scan_for_background_processes(request, &event).await;

        if let CanonicalEvent::Result { blocks, .. } = &event {
            if summary.is_none() {
                *summary = blocks.iter().find_map(ContentBlock::text_content);
            }
        }

        self.emit(OutboundEvent::ExecutionEvent {
            execution_id: execution_id.clone(),
            event,
        })
        .await;
    }

    /// Hand tool-result text to the process registry for PID adoption.
    ///
    /// This is the only contract between an execution's tool output and the
    /// registry: a sentinel line carrying the detached process's PID.
    async fn scan_for_background_processes(&self, request: &StartExecution, event: &CanonicalEvent) {
        for block in event.blocks() {
            let ContentBlock::ToolResult { .. } = block else {
                continue;
            };
            let Some(text) = block.text_content() else {
                continue;
            };

            if let Some(process) = self
                .registry
                .adopt_from_tool_output(&request.task_id, &request.execution_id, &text)
                .await
            {
                self.emit(OutboundEvent::ProcessDiscovered {
                    execution_id: request.execution_id.clone(),
                    process_id: process.id,
                    command: process.command,
                })
                .await;
            }
        }
    }

    /// Terminal bookkeeping: checkpoint commit on success, slot discard
    /// otherwise, registry removal, and the exit envelope.
    async fn finish(
        &self,
        request: &StartExecution,
        outcome: Outcome,
        session_id: Option<String>,
        message_count: u64,
        summary: Option<String>,
    ) {
        let execution_id = &request.execution_id;

        let code = match outcome {
            Outcome::Completed => {
                // A checkpoint row needs the session it belongs to; a marker
                // captured without any session-bearing message is discarded.
                if let Some(sid) = session_id {
                    // Best effort: a persistence failure here never fails an
                    // otherwise-successful execution.
                    match self
                        .checkpoints
                        .save_checkpoint(execution_id, &sid, message_count, summary)
                        .await
                    {
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            debug!(execution_id, "execution completed without checkpoint");
                        }
                        Err(err) => {
                            warn!(execution_id, %err, "checkpoint save failed, dropping");
                        }
                    }
                } else {
                    debug!(execution_id, "no session captured, skipping checkpoint");
                    self.checkpoints.discard(execution_id).await;
                }
                Some(0)
            }
            Outcome::Failed(err) => {
                warn!(execution_id, %err, "execution failed");
                self.checkpoints.discard(execution_id).await;
                self.emit(OutboundEvent::ExecutionError {
                    execution_id: execution_id.clone(),
                    message: err.to_string(),
                })
                .await;
                Some(1)
            }
            Outcome::Cancelled => {
                self.checkpoints.discard(execution_id).await;
                None
            }
        };

        // Idempotent with `cancel`: the entry may already be gone.
        self.executions.lock().await.remove(execution_id);
        // A question pending at stream end would leak its suspended callback.
        self.gate.cancel(execution_id).await;

        info!(execution_id, ?code, "execution finished");
        self.emit(OutboundEvent::ExecutionExit {
            execution_id: execution_id.clone(),
            code,
        })
        .await;
    }

    async fn emit(&self, event: OutboundEvent) {
        if self.outbound.send(event).await.is_err() {
            warn!("outbound event channel closed, dropping event");
        }
    }
}
