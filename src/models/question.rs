//! Structured question model for the interactive question flow.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One structured choice presented to the operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QuestionOption {
    /// Option label shown to the operator.
    pub label: String,
    /// Optional longer description of the option.
    #[serde(default)]
    pub description: Option<String>,
}

/// A single structured question extracted from an `AskUserQuestion` tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Question {
    /// Question text.
    pub question: String,
    /// Short header or category for the question.
    #[serde(default)]
    pub header: Option<String>,
    /// Selectable options.
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Whether multiple options may be selected.
    #[serde(default)]
    pub multi_select: bool,
}

/// Signal emitted by the normalizer when an `AskUserQuestion` tool invocation
/// is found in an assistant message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSignal {
    /// Tool-use block identifier the answer must be correlated with.
    pub tool_use_id: String,
    /// Questions carried by the invocation.
    pub questions: Vec<Question>,
}

/// Decision delivered back to a suspended tool-authorization callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionDecision {
    /// Allow the tool call, carrying the operator's answers keyed by
    /// question header or tool-use id.
    Allow {
        /// Answers merged into the tool input upstream.
        answers: HashMap<String, String>,
    },
    /// Deny the tool call with a reason. Delivered on duplicate question
    /// requests and on cancellation; interpreted upstream as tool denial,
    /// not as an internal error.
    Deny {
        /// Human-readable denial reason.
        reason: String,
    },
}
