//! Interactive question gate.
//!
//! Suspends an execution's stream when the agent invokes the structured
//! question tool, until an operator answers or the execution is cancelled.
//! Per execution the state machine is
//! `Idle → AwaitingAnswer → {Answered | Denied} → Idle`, enforced by an
//! at-most-one-pending oneshot entry keyed by execution id.
//!
//! There is deliberately no timeout: a question may remain pending
//! indefinitely; only an explicit answer or a cancellation ends the
//! suspension.

use std::collections::HashMap;
use std::pin::Pin;

use futures_util::Future;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::agent::{ToolAuthorizer, ToolCallRequest, ToolDecision};
use crate::events::normalizer::QUESTION_TOOL_NAME;
use crate::models::question::QuestionDecision;

/// A registered suspension waiting for an operator decision.
struct PendingQuestion {
    tool_use_id: String,
    resolve: oneshot::Sender<QuestionDecision>,
}

/// Gate holding at most one pending question per execution id.
#[derive(Default)]
pub struct QuestionGate {
    pending: Mutex<HashMap<String, PendingQuestion>>,
}

impl QuestionGate {
    /// Create an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until the question for `execution_id` is answered or denied.
    ///
    /// Registers the await point and blocks the calling authorization
    /// callback. A second question for the same execution while one is
    /// pending resolves immediately with a `"duplicate"` denial, preserving
    /// the at-most-one-pending invariant.
    pub async fn await_answer(&self, execution_id: &str, tool_use_id: &str) -> QuestionDecision {
        let rx = {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(execution_id) {
                warn!(
                    execution_id,
                    tool_use_id, "question already pending, denying duplicate"
                );
                return QuestionDecision::Deny {
                    reason: "duplicate question: another question is already pending".into(),
                };
            }

            let (tx, rx) = oneshot::channel();
            pending.insert(
                execution_id.to_owned(),
                PendingQuestion {
                    tool_use_id: tool_use_id.to_owned(),
                    resolve: tx,
                },
            );
            rx
        };

        info!(execution_id, tool_use_id, "question pending, stream suspended");

        match rx.await {
            Ok(decision) => decision,
            Err(_) => {
                // Sender dropped without resolving (host shutdown).
                QuestionDecision::Deny {
                    reason: "question gate shut down".into(),
                }
            }
        }
    }

    /// Resolve the pending question with an allow decision carrying answers.
    ///
    /// Returns `false` when nothing is pending for `execution_id`.
    pub async fn answer(
        &self,
        execution_id: &str,
        answers: HashMap<String, String>,
    ) -> bool {
        let entry = self.pending.lock().await.remove(execution_id);
        let Some(entry) = entry else {
            debug!(execution_id, "answer for execution with no pending question");
            return false;
        };

        info!(
            execution_id,
            tool_use_id = entry.tool_use_id,
            "question answered, resuming stream"
        );
        entry
            .resolve
            .send(QuestionDecision::Allow { answers })
            .is_ok()
    }

    /// Resolve the pending question with a deny decision.
    ///
    /// Used both for explicit question cancellation and for execution-level
    /// cancel; the resuming callback interprets this as tool denial, not as
    /// an internal error. Returns `false` when nothing is pending.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        let entry = self.pending.lock().await.remove(execution_id);
        let Some(entry) = entry else {
            return false;
        };

        info!(
            execution_id,
            tool_use_id = entry.tool_use_id,
            "pending question cancelled"
        );
        let _ = entry.resolve.send(QuestionDecision::Deny {
            reason: "question cancelled".into(),
        });
        true
    }

    /// Whether a question is currently pending for `execution_id`.
    pub async fn has_pending(&self, execution_id: &str) -> bool {
        self.pending.lock().await.contains_key(execution_id)
    }
}

impl ToolAuthorizer for QuestionGate {
    /// Authorize a tool call inline with the upstream stream.
    ///
    /// The structured question tool suspends on the gate; answers are merged
    /// into the tool input on allow. Every other tool passes through
    /// unchanged.
    fn authorize(
        &self,
        request: ToolCallRequest,
    ) -> Pin<Box<dyn Future<Output = ToolDecision> + Send + '_>> {
        Box::pin(async move {
            if request.tool_name != QUESTION_TOOL_NAME {
                return ToolDecision::Allow {
                    input: request.input,
                };
            }

            let decision = self
                .await_answer(&request.execution_id, &request.tool_use_id)
                .await;

            match decision {
                QuestionDecision::Allow { answers } => {
                    let mut input = request.input;
                    if let Some(obj) = input.as_object_mut() {
                        if let Ok(value) = serde_json::to_value(&answers) {
                            obj.insert("answers".to_owned(), value);
                        }
                    }
                    ToolDecision::Allow { input }
                }
                QuestionDecision::Deny { reason } => ToolDecision::Deny { reason },
            }
        })
    }
}
