//! Inbound frame classification

use serde::Deserialize;
use serde_json::Value;

/// Control frame types this client understands. Anything else carrying a
/// `type` field is dropped.
const KNOWN_TYPES: &[&str] = &[
    "conversation_created",
    "message_complete",
    "text_block_complete",
    "tool_call",
    "tool_result",
    "tool_approval_result",
    "approval_result",
    "task_started",
    "error",
];

/// Structured control frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    ConversationCreated {
        conversation_id: String,
        #[serde(default)]
        title: Option<String>,
    },
    MessageComplete {
        #[serde(default)]
        conversation_id: Option<String>,
    },
    TextBlockComplete {
        #[serde(default)]
        conversation_id: Option<String>,
    },
    ToolCall {
        tool_id: String,
        tool_name: String,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    ToolResult {
        tool_id: String,
        result: Value,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    #[serde(alias = "approval_result")]
    ToolApprovalResult {
        operation_id: String,
        status: ApprovalStatus,
        #[serde(default)]
        result: Option<Value>,
    },
    TaskStarted {
        task_id: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    Error {
        message: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
}

impl ControlFrame {
    /// Conversation this frame names explicitly, if any
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            ControlFrame::ConversationCreated {
                conversation_id, ..
            } => Some(conversation_id),
            ControlFrame::MessageComplete { conversation_id }
            | ControlFrame::TextBlockComplete { conversation_id }
            | ControlFrame::ToolCall {
                conversation_id, ..
            }
            | ControlFrame::ToolResult {
                conversation_id, ..
            }
            | ControlFrame::TaskStarted {
                conversation_id, ..
            }
            | ControlFrame::Error {
                conversation_id, ..
            } => conversation_id.as_deref(),
            ControlFrame::ToolApprovalResult { .. } => None,
        }
    }
}

/// Terminal outcome reported for an approval operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Completed,
    Failed,
    #[serde(alias = "cancelled")]
    Canceled,
    Expired,
}

/// Why an inbound frame was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownType(String),
    Malformed { frame_type: String, error: String },
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Control(ControlFrame),
    /// Streaming text for the conversation currently streaming on the connection
    Text(String),
    Ignored(IgnoreReason),
}

/// Classify a raw inbound frame.
///
/// Only a JSON object with a string `type` is a control frame. Every other
/// payload, including JSON that is not an object, is streamed text.
pub fn classify(raw: &str) -> Frame {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        return Frame::Text(raw.to_string());
    };

    let Some(frame_type) = map.get("type").and_then(Value::as_str).map(str::to_string) else {
        return Frame::Text(raw.to_string());
    };

    if !KNOWN_TYPES.contains(&frame_type.as_str()) {
        return Frame::Ignored(IgnoreReason::UnknownType(frame_type));
    }

    match serde_json::from_value::<ControlFrame>(Value::Object(map)) {
        Ok(frame) => Frame::Control(frame),
        Err(e) => Frame::Ignored(IgnoreReason::Malformed {
            frame_type,
            error: e.to_string(),
        }),
    }
}

/// How a `tool_result` payload affects the invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResultKind {
    Complete,
    PendingApproval { operation_id: String },
}

/// Classify a tool result by its `status` field.
///
/// `status == "pending_approval"` with a string `operation_id` is an approval
/// request; every other payload is a finished result.
pub fn classify_tool_result(result: &Value) -> ToolResultKind {
    let status = result.get("status").and_then(Value::as_str);
    let operation_id = result.get("operation_id").and_then(Value::as_str);

    match (status, operation_id) {
        (Some("pending_approval"), Some(operation_id)) => ToolResultKind::PendingApproval {
            operation_id: operation_id.to_string(),
        },
        _ => ToolResultKind::Complete,
    }
}
