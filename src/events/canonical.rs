//! Canonical event schema.
//!
//! The normalized output envelope, independent of upstream message shape.
//! Events are immutable once produced; normalizing the same upstream message
//! twice yields structurally equal values.

use serde::{Deserialize, Serialize};

/// One typed content block inside a canonical event.
///
/// Assistant and user messages project their content-block lists
/// element-wise and type-preserving into these variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text content.
    Text {
        /// Text payload.
        text: String,
    },
    /// Model reasoning ("thinking") content.
    Thinking {
        /// Reasoning payload.
        thinking: String,
    },
    /// Tool invocation made by the assistant.
    ToolUse {
        /// Tool-use block identifier.
        id: String,
        /// Invoked tool name.
        name: String,
        /// Tool input as raw JSON.
        input: serde_json::Value,
    },
    /// Result returned for an earlier tool invocation.
    ToolResult {
        /// Identifier of the tool-use block this result answers.
        tool_use_id: String,
        /// Result content as raw JSON (string or block list upstream).
        content: serde_json::Value,
        /// Whether the tool reported an error.
        is_error: bool,
    },
}

impl ContentBlock {
    /// Textual content of the block, when it carries any.
    ///
    /// Tool results render their JSON content as text so callers can scan
    /// result output (e.g. for the background-process PID sentinel).
    #[must_use]
    pub fn text_content(&self) -> Option<String> {
        match self {
            Self::Text { text } => Some(text.clone()),
            Self::Thinking { thinking } => Some(thinking.clone()),
            Self::ToolUse { .. } => None,
            Self::ToolResult { content, .. } => match content {
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            },
        }
    }
}

/// The canonical event union over all upstream message kinds.
///
/// Unknown or future upstream kinds pass through under the [`Raw`] envelope
/// rather than being dropped.
///
/// [`Raw`]: CanonicalEvent::Raw
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    /// System-level message (init, status, …).
    System {
        /// Upstream subtype discriminant, when present.
        subtype: Option<String>,
        /// Content blocks.
        blocks: Vec<ContentBlock>,
    },
    /// Assistant turn.
    Assistant {
        /// Content blocks.
        blocks: Vec<ContentBlock>,
    },
    /// User turn (tool results are echoed back as user messages upstream).
    User {
        /// Content blocks.
        blocks: Vec<ContentBlock>,
    },
    /// Standalone tool invocation message.
    ToolUse {
        /// Content blocks.
        blocks: Vec<ContentBlock>,
    },
    /// Standalone tool result message.
    ToolResult {
        /// Content blocks.
        blocks: Vec<ContentBlock>,
    },
    /// Terminal result message for the execution.
    Result {
        /// Upstream subtype discriminant, when present.
        subtype: Option<String>,
        /// Whether upstream flagged the run as an error.
        is_error: bool,
        /// Content blocks.
        blocks: Vec<ContentBlock>,
    },
    /// Generic envelope for unknown upstream message kinds.
    Raw {
        /// Upstream `type` discriminant.
        kind: String,
        /// Unmodified upstream payload.
        payload: serde_json::Value,
    },
}

impl CanonicalEvent {
    /// Content blocks carried by this event, empty for [`Raw`] envelopes.
    ///
    /// [`Raw`]: CanonicalEvent::Raw
    #[must_use]
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            Self::System { blocks, .. }
            | Self::Assistant { blocks }
            | Self::User { blocks }
            | Self::ToolUse { blocks }
            | Self::ToolResult { blocks }
            | Self::Result { blocks, .. } => blocks,
            Self::Raw { .. } => &[],
        }
    }
}
