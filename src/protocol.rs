//! Wire protocol for the per-user conversation connection
//!
//! Inbound frames are either raw text deltas or JSON control frames carrying a
//! `type` discriminant. Outbound frames are always JSON commands.

mod history;
mod inbound;
mod outbound;

pub use history::{LoadedConversation, LoadedMessage};
pub use inbound::{
    classify, classify_tool_result, ApprovalStatus, ControlFrame, Frame, IgnoreReason,
    ToolResultKind,
};
pub use outbound::OutboundCommand;

use serde::{Deserialize, Serialize};

/// Connectivity of the underlying persistent connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    /// Outbound commands are only accepted while connected
    pub fn accepts_outbound(self) -> bool {
        matches!(self, Self::Connected)
    }
}
