//! Change notifications produced by the dispatcher

use super::state::{ConversationKey, LoadStatus};
use super::tracker::InvocationStatus;
use crate::protocol::ConnectionStatus;

/// Effects published to presentation subscribers after a mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Pending conversation received its durable id
    ConversationCreated {
        conversation_id: String,
        title: String,
    },

    TextAppended {
        conversation: ConversationKey,
        delta: String,
    },

    ToolStarted {
        conversation: ConversationKey,
        tool_id: String,
        tool_name: String,
    },

    ToolFinished {
        conversation: ConversationKey,
        tool_id: String,
    },

    ApprovalRequested {
        conversation: ConversationKey,
        operation_id: String,
        tool_name: String,
    },

    /// Approval was submitted by the user or resolved by the server
    ApprovalUpdated {
        operation_id: String,
        status: InvocationStatus,
        is_processing: bool,
    },

    MessageFinished {
        conversation: ConversationKey,
    },

    StreamFailed {
        conversation: ConversationKey,
        message: String,
    },

    /// Flags (thinking, active task) or the message list changed
    TranscriptChanged {
        conversation: ConversationKey,
    },

    ConversationLoaded {
        conversation_id: String,
        status: LoadStatus,
    },

    ConversationClosed {
        conversation: ConversationKey,
    },

    ConnectionChanged(ConnectionStatus),
}

impl Effect {
    pub fn transcript_changed(conversation: ConversationKey) -> Self {
        Effect::TranscriptChanged { conversation }
    }

    /// Conversation the effect concerns, when it is tied to one
    pub fn conversation(&self) -> Option<&ConversationKey> {
        match self {
            Effect::TextAppended { conversation, .. }
            | Effect::ToolStarted { conversation, .. }
            | Effect::ToolFinished { conversation, .. }
            | Effect::ApprovalRequested { conversation, .. }
            | Effect::MessageFinished { conversation }
            | Effect::StreamFailed { conversation, .. }
            | Effect::TranscriptChanged { conversation }
            | Effect::ConversationClosed { conversation } => Some(conversation),
            Effect::ConversationCreated { .. }
            | Effect::ApprovalUpdated { .. }
            | Effect::ConversationLoaded { .. }
            | Effect::ConnectionChanged(_) => None,
        }
    }
}
