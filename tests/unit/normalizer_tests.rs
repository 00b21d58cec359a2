//! Unit tests for upstream message normalization.

use agent_conductor::events::canonical::{CanonicalEvent, ContentBlock};
use agent_conductor::events::normalizer::{normalize, QUESTION_TOOL_NAME};
use agent_conductor::AppError;
use serde_json::json;

#[test]
fn init_system_message_surfaces_session_id() {
    let message = json!({
        "type": "system",
        "subtype": "init",
        "session_id": "sess-abc",
    });

    let normalized = normalize(&message).expect("normalize");
    assert_eq!(normalized.session_id.as_deref(), Some("sess-abc"));
    assert!(matches!(
        normalized.event,
        CanonicalEvent::System { ref subtype, .. } if subtype.as_deref() == Some("init")
    ));
}

#[test]
fn non_init_system_message_carries_no_session_id() {
    let message = json!({
        "type": "system",
        "subtype": "status",
        "session_id": "sess-later",
    });

    let normalized = normalize(&message).expect("normalize");
    assert!(normalized.session_id.is_none());
}

#[test]
fn assistant_text_blocks_are_projected() {
    let message = json!({
        "type": "assistant",
        "message": {
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "thinking", "thinking": "hmm"},
            ],
        },
    });

    let normalized = normalize(&message).expect("normalize");
    let CanonicalEvent::Assistant { blocks } = normalized.event else {
        panic!("expected assistant event");
    };
    assert_eq!(blocks.len(), 2);
    assert_eq!(
        blocks[0],
        ContentBlock::Text {
            text: "hello".to_owned()
        }
    );
    assert!(normalized.question.is_none());
}

#[test]
fn bare_string_content_becomes_one_text_block() {
    let message = json!({
        "type": "user",
        "content": "plain text",
    });

    let normalized = normalize(&message).expect("normalize");
    let CanonicalEvent::User { blocks } = normalized.event else {
        panic!("expected user event");
    };
    assert_eq!(
        blocks,
        vec![ContentBlock::Text {
            text: "plain text".to_owned()
        }]
    );
}

#[test]
fn unknown_block_types_are_skipped() {
    let message = json!({
        "type": "assistant",
        "content": [
            {"type": "hologram", "data": 42},
            {"type": "text", "text": "kept"},
        ],
    });

    let normalized = normalize(&message).expect("normalize");
    let CanonicalEvent::Assistant { blocks } = normalized.event else {
        panic!("expected assistant event");
    };
    assert_eq!(blocks.len(), 1);
}

#[test]
fn question_tool_use_raises_question_signal() {
    let message = json!({
        "type": "assistant",
        "message": {
            "content": [{
                "type": "tool_use",
                "id": "toolu_01",
                "name": QUESTION_TOOL_NAME,
                "input": {
                    "questions": [{
                        "question": "Which database?",
                        "header": "Database",
                        "options": [
                            {"label": "sqlite", "description": "embedded"},
                            {"label": "postgres", "description": "server"},
                        ],
                        "multi_select": false,
                    }],
                },
            }],
        },
    });

    let normalized = normalize(&message).expect("normalize");
    let signal = normalized.question.expect("question signal");
    assert_eq!(signal.tool_use_id, "toolu_01");
    assert_eq!(signal.questions.len(), 1);
    assert_eq!(signal.questions[0].question, "Which database?");
    assert_eq!(signal.questions[0].options.len(), 2);

    // The canonical event is still emitted alongside the signal.
    assert!(matches!(normalized.event, CanonicalEvent::Assistant { .. }));
}

#[test]
fn other_tool_use_raises_no_question_signal() {
    let message = json!({
        "type": "assistant",
        "content": [{
            "type": "tool_use",
            "id": "toolu_02",
            "name": "Bash",
            "input": {"command": "ls"},
        }],
    });

    let normalized = normalize(&message).expect("normalize");
    assert!(normalized.question.is_none());
}

#[test]
fn malformed_question_input_yields_empty_question_list() {
    let message = json!({
        "type": "assistant",
        "content": [{
            "type": "tool_use",
            "id": "toolu_03",
            "name": QUESTION_TOOL_NAME,
            "input": {"questions": "not an array"},
        }],
    });

    let normalized = normalize(&message).expect("normalize");
    let signal = normalized.question.expect("question signal");
    assert!(signal.questions.is_empty());
}

#[test]
fn user_message_surfaces_checkpoint_marker() {
    let message = json!({
        "type": "user",
        "checkpoint_id": "ckpt-42",
        "content": [],
    });

    let normalized = normalize(&message).expect("normalize");
    assert_eq!(normalized.checkpoint_marker.as_deref(), Some("ckpt-42"));
}

#[test]
fn result_message_falls_back_to_result_string() {
    let message = json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "result": "all done",
    });

    let normalized = normalize(&message).expect("normalize");
    let CanonicalEvent::Result {
        subtype,
        is_error,
        blocks,
    } = normalized.event
    else {
        panic!("expected result event");
    };
    assert_eq!(subtype.as_deref(), Some("success"));
    assert!(!is_error);
    assert_eq!(
        blocks,
        vec![ContentBlock::Text {
            text: "all done".to_owned()
        }]
    );
}

#[test]
fn unknown_type_passes_through_as_raw() {
    let message = json!({
        "type": "telemetry",
        "metric": 7,
    });

    let normalized = normalize(&message).expect("normalize");
    let CanonicalEvent::Raw { kind, payload } = normalized.event else {
        panic!("expected raw event");
    };
    assert_eq!(kind, "telemetry");
    assert_eq!(payload, message);
}

#[test]
fn non_object_message_is_a_decode_error() {
    let err = normalize(&json!(["not", "an", "object"])).expect_err("decode error");
    assert!(matches!(err, AppError::Decode(_)));
}

#[test]
fn missing_type_is_a_decode_error() {
    let err = normalize(&json!({"session_id": "s"})).expect_err("decode error");
    assert!(matches!(err, AppError::Decode(_)));
}

#[test]
fn normalization_is_deterministic() {
    let message = json!({
        "type": "assistant",
        "message": {
            "content": [
                {"type": "text", "text": "same"},
                {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "pwd"}},
            ],
        },
    });

    let first = normalize(&message).expect("normalize");
    let second = normalize(&message).expect("normalize");
    assert_eq!(first, second);
}

#[test]
fn tool_result_renders_json_content_as_text() {
    let message = json!({
        "type": "tool_result",
        "tool_use_id": "toolu_04",
        "content": [{"type": "text", "text": "BGPID:1234 started"}],
    });

    let normalized = normalize(&message).expect("normalize");
    let CanonicalEvent::ToolResult { blocks } = normalized.event else {
        panic!("expected tool-result event");
    };
    let text = blocks[0].text_content().expect("text content");
    assert!(text.contains("BGPID:1234"));
}
