//! Upstream message normalization.
//!
//! Pure, stateless mapping from one upstream NDJSON message to a
//! [`CanonicalEvent`] plus side-channel extractions, performed in one pass:
//!
//! | Upstream `type` | Maps to                                   |
//! |-----------------|-------------------------------------------|
//! | `system`        | [`CanonicalEvent::System`] (+ session id on `init`) |
//! | `assistant`     | [`CanonicalEvent::Assistant`] (+ question signal)   |
//! | `user`          | [`CanonicalEvent::User`] (+ checkpoint marker)      |
//! | `tool_use`      | [`CanonicalEvent::ToolUse`]               |
//! | `tool_result`   | [`CanonicalEvent::ToolResult`]            |
//! | `result`        | [`CanonicalEvent::Result`]                |
//! | *(any other)*   | [`CanonicalEvent::Raw`] passthrough       |
//!
//! The caller owns all statefulness: first-session-wins and
//! latest-marker-wins are applied by the coordinator, never here.

use serde_json::Value;

use crate::events::canonical::{CanonicalEvent, ContentBlock};
use crate::models::question::{Question, QuestionSignal};
use crate::{AppError, Result};

/// Tool name whose invocation suspends the execution for an operator answer.
pub const QUESTION_TOOL_NAME: &str = "AskUserQuestion";

/// Fully normalized upstream message: the canonical event plus everything
/// extracted alongside it in the same pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// Canonical event to emit outward.
    pub event: CanonicalEvent,
    /// Upstream session id, surfaced only from `system`/`init` messages.
    pub session_id: Option<String>,
    /// In-band checkpoint marker, surfaced only from user-role messages
    /// that carry one.
    pub checkpoint_marker: Option<String>,
    /// Question signal, surfaced when an assistant content block invokes
    /// [`QUESTION_TOOL_NAME`].
    pub question: Option<QuestionSignal>,
}

/// Normalize one upstream message.
///
/// Referentially transparent: the same input always yields a structurally
/// equal [`Normalized`] value.
///
/// # Errors
///
/// Returns `AppError::Decode` when the message is not a JSON object or has
/// no string `type` discriminant. Callers treat this as a transient
/// per-message fault: log, skip, continue the stream.
pub fn normalize(message: &Value) -> Result<Normalized> {
    let obj = message
        .as_object()
        .ok_or_else(|| AppError::Decode("upstream message is not a JSON object".into()))?;

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Decode("upstream message has no `type` discriminant".into()))?;

    let normalized = match kind {
        "system" => normalize_system(message),
        "assistant" => normalize_assistant(message),
        "user" => normalize_user(message),
        "tool_use" => plain(CanonicalEvent::ToolUse {
            blocks: vec![project_block(message).ok_or_else(|| {
                AppError::Decode("tool_use message is not a valid tool-use block".into())
            })?],
        }),
        "tool_result" => plain(CanonicalEvent::ToolResult {
            blocks: vec![project_block(message).ok_or_else(|| {
                AppError::Decode("tool_result message is not a valid tool-result block".into())
            })?],
        }),
        "result" => normalize_result(message),
        other => plain(CanonicalEvent::Raw {
            kind: other.to_owned(),
            payload: message.clone(),
        }),
    };

    Ok(normalized)
}

fn plain(event: CanonicalEvent) -> Normalized {
    Normalized {
        event,
        session_id: None,
        checkpoint_marker: None,
        question: None,
    }
}

fn normalize_system(message: &Value) -> Normalized {
    let subtype = message
        .get("subtype")
        .and_then(Value::as_str)
        .map(str::to_owned);

    // Session ids ride only on init-type system messages; later system
    // messages never override the captured id.
    let session_id = if subtype.as_deref() == Some("init") {
        message
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
    } else {
        None
    };

    Normalized {
        event: CanonicalEvent::System {
            subtype,
            blocks: project_content(message),
        },
        session_id,
        checkpoint_marker: None,
        question: None,
    }
}

fn normalize_assistant(message: &Value) -> Normalized {
    let blocks = project_content(message);
    let question = detect_question(&blocks);

    Normalized {
        event: CanonicalEvent::Assistant { blocks },
        session_id: None,
        checkpoint_marker: None,
        question,
    }
}

fn normalize_user(message: &Value) -> Normalized {
    // Present only when checkpoint replay is enabled upstream.
    let checkpoint_marker = message
        .get("checkpoint_id")
        .and_then(Value::as_str)
        .map(str::to_owned);

    Normalized {
        event: CanonicalEvent::User {
            blocks: project_content(message),
        },
        session_id: None,
        checkpoint_marker,
        question: None,
    }
}

fn normalize_result(message: &Value) -> Normalized {
    let subtype = message
        .get("subtype")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let is_error = message
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut blocks = project_content(message);
    if blocks.is_empty() {
        if let Some(text) = message.get("result").and_then(Value::as_str) {
            blocks.push(ContentBlock::Text {
                text: text.to_owned(),
            });
        }
    }

    Normalized {
        event: CanonicalEvent::Result {
            subtype,
            is_error,
            blocks,
        },
        session_id: None,
        checkpoint_marker: None,
        question: None,
    }
}

// ── Content projection ────────────────────────────────────────────────────────

/// Project the message's content-block list element-wise.
///
/// Accepts both `{"message": {"content": …}}` nesting and a top-level
/// `"content"` field; a bare string becomes a single text block. Unknown
/// block types are skipped.
fn project_content(message: &Value) -> Vec<ContentBlock> {
    let content = message
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| message.get("content"));

    match content {
        Some(Value::String(text)) => vec![ContentBlock::Text { text: text.clone() }],
        Some(Value::Array(items)) => items.iter().filter_map(project_block).collect(),
        _ => Vec::new(),
    }
}

/// Project one upstream content block, type-preserving.
fn project_block(item: &Value) -> Option<ContentBlock> {
    match item.get("type").and_then(Value::as_str)? {
        "text" => Some(ContentBlock::Text {
            text: item.get("text").and_then(Value::as_str)?.to_owned(),
        }),
        "thinking" => Some(ContentBlock::Thinking {
            thinking: item.get("thinking").and_then(Value::as_str)?.to_owned(),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: item.get("id").and_then(Value::as_str)?.to_owned(),
            name: item.get("name").and_then(Value::as_str)?.to_owned(),
            input: item.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => Some(ContentBlock::ToolResult {
            tool_use_id: item.get("tool_use_id").and_then(Value::as_str)?.to_owned(),
            content: item.get("content").cloned().unwrap_or(Value::Null),
            is_error: item
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }),
        _ => None,
    }
}

// ── Question detection ────────────────────────────────────────────────────────

/// Scan assistant blocks for an [`QUESTION_TOOL_NAME`] invocation.
///
/// The signal is emitted alongside the canonical event, never instead of it.
fn detect_question(blocks: &[ContentBlock]) -> Option<QuestionSignal> {
    blocks.iter().find_map(|block| match block {
        ContentBlock::ToolUse { id, name, input } if name == QUESTION_TOOL_NAME => {
            Some(QuestionSignal {
                tool_use_id: id.clone(),
                questions: parse_questions(input),
            })
        }
        _ => None,
    })
}

/// Parse the `questions` array from the tool input, tolerating partial shapes.
fn parse_questions(input: &Value) -> Vec<Question> {
    input
        .get("questions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}
