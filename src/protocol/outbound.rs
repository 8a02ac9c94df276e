//! Outbound command frames

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;

/// Commands sent to the server on user action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    SendMessage {
        message: String,
        /// `None` for a brand-new conversation
        conversation_id: Option<String>,
        local_time: String,
        timezone: String,
    },
    Cancel {
        task_id: String,
    },
    ToolApproval {
        operation_id: String,
        approved: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        options: Option<Value>,
        conversation_id: Option<String>,
    },
}

impl OutboundCommand {
    pub fn send_message(
        message: impl Into<String>,
        conversation_id: Option<String>,
        now: DateTime<Local>,
    ) -> Self {
        OutboundCommand::SendMessage {
            message: message.into(),
            conversation_id,
            local_time: now.to_rfc3339(),
            timezone: now.format("%:z").to_string(),
        }
    }

    /// Wire name of the command
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundCommand::SendMessage { .. } => "send_message",
            OutboundCommand::Cancel { .. } => "cancel",
            OutboundCommand::ToolApproval { .. } => "tool_approval",
        }
    }

    /// Serialize to a text frame
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
