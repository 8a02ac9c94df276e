//! Tool invocation tracking
//!
//! Tool calls are keyed by the tool-call id carried on the content block.
//! Approvals live in a separate key space, keyed by the server-issued
//! operation id.

use super::dispatcher::DispatchError;
use super::state::ConversationKey;
use crate::protocol::{ApprovalStatus, OutboundCommand};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Status of a tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Running,
    PendingApproval,
    Completed,
    Failed,
    Canceled,
    Expired,
}

impl InvocationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Expired
        )
    }
}

impl From<ApprovalStatus> for InvocationStatus {
    fn from(status: ApprovalStatus) -> Self {
        match status {
            ApprovalStatus::Completed => Self::Completed,
            ApprovalStatus::Failed => Self::Failed,
            ApprovalStatus::Canceled => Self::Canceled,
            ApprovalStatus::Expired => Self::Expired,
        }
    }
}

/// A tool call seen on the stream
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallEntry {
    pub tool_name: String,
    pub input: Value,
    pub status: InvocationStatus,
    pub conversation: ConversationKey,
}

/// An approval-gated operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocationState {
    pub operation_id: String,
    pub tool_name: String,
    /// Tool call whose result requested the approval
    pub tool_call_id: String,
    pub status: InvocationStatus,
    pub result: Option<Value>,
    /// The user's decision was sent and no outcome has arrived yet
    pub is_processing: bool,
    #[serde(skip)]
    pub conversation: ConversationKey,
}

/// Terminal outcome of an approval
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalOutcome {
    pub status: InvocationStatus,
    pub result: Option<Value>,
}

/// What `resolve` did
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Applied,
    /// Already terminal; carries the stored outcome
    AlreadyResolved(ApprovalOutcome),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolTracker {
    calls: HashMap<String, ToolCallEntry>,
    approvals: HashMap<String, ToolInvocationState>,
}

impl ToolTracker {
    pub fn call(&self, tool_call_id: &str) -> Option<&ToolCallEntry> {
        self.calls.get(tool_call_id)
    }

    pub fn approval(&self, operation_id: &str) -> Option<&ToolInvocationState> {
        self.approvals.get(operation_id)
    }

    pub fn approvals(&self) -> impl Iterator<Item = &ToolInvocationState> {
        self.approvals.values()
    }

    /// Register a running tool call. Returns false if the id is already known.
    pub fn start(
        &mut self,
        tool_call_id: &str,
        tool_name: &str,
        input: Value,
        conversation: ConversationKey,
    ) -> bool {
        if self.calls.contains_key(tool_call_id) {
            return false;
        }
        self.calls.insert(
            tool_call_id.to_string(),
            ToolCallEntry {
                tool_name: tool_name.to_string(),
                input,
                status: InvocationStatus::Running,
                conversation,
            },
        );
        true
    }

    /// Mark a tool call complete. Returns `None` for unknown ids, otherwise
    /// whether the status changed. The result itself lives on the content block.
    pub fn complete(&mut self, tool_call_id: &str) -> Option<bool> {
        let entry = self.calls.get_mut(tool_call_id)?;
        if entry.status == InvocationStatus::Completed {
            return Some(false);
        }
        entry.status = InvocationStatus::Completed;
        Some(true)
    }

    /// Register an approval request. Returns false if the operation is already known.
    pub fn request_approval(
        &mut self,
        operation_id: &str,
        tool_name: &str,
        tool_call_id: &str,
        conversation: ConversationKey,
    ) -> bool {
        if self.approvals.contains_key(operation_id) {
            return false;
        }
        self.approvals.insert(
            operation_id.to_string(),
            ToolInvocationState {
                operation_id: operation_id.to_string(),
                tool_name: tool_name.to_string(),
                tool_call_id: tool_call_id.to_string(),
                status: InvocationStatus::PendingApproval,
                result: None,
                is_processing: false,
                conversation,
            },
        );
        true
    }

    /// Move an approval to its terminal state, at most once.
    pub fn resolve(&mut self, operation_id: &str, outcome: ApprovalOutcome) -> Option<Resolution> {
        let state = self.approvals.get_mut(operation_id)?;
        if state.status.is_terminal() {
            return Some(Resolution::AlreadyResolved(ApprovalOutcome {
                status: state.status,
                result: state.result.clone(),
            }));
        }
        state.status = outcome.status;
        state.result = outcome.result;
        state.is_processing = false;
        Some(Resolution::Applied)
    }

    /// User approved the operation
    pub fn approve(
        &mut self,
        operation_id: &str,
        options: Option<Value>,
    ) -> Result<OutboundCommand, DispatchError> {
        self.submit(operation_id, true, options)
    }

    /// User declined the operation
    pub fn cancel(&mut self, operation_id: &str) -> Result<OutboundCommand, DispatchError> {
        self.submit(operation_id, false, None)
    }

    fn submit(
        &mut self,
        operation_id: &str,
        approved: bool,
        options: Option<Value>,
    ) -> Result<OutboundCommand, DispatchError> {
        let state = self
            .approvals
            .get_mut(operation_id)
            .ok_or_else(|| DispatchError::UnknownOperation(operation_id.to_string()))?;

        if state.status != InvocationStatus::PendingApproval || state.is_processing {
            return Err(DispatchError::ApprovalNotPending(operation_id.to_string()));
        }

        state.is_processing = true;
        Ok(OutboundCommand::ToolApproval {
            operation_id: operation_id.to_string(),
            approved,
            options,
            conversation_id: state.conversation.durable_id().map(str::to_string),
        })
    }

    /// Undo a submit that was never delivered. Returns whether anything changed.
    pub fn withdraw(&mut self, operation_id: &str) -> bool {
        let Some(state) = self.approvals.get_mut(operation_id) else {
            return false;
        };
        if state.status != InvocationStatus::PendingApproval || !state.is_processing {
            return false;
        }
        state.is_processing = false;
        true
    }

    /// Point every entry of one conversation at another key
    pub(crate) fn rekey_conversation(&mut self, from: &ConversationKey, to: &ConversationKey) {
        for entry in self.calls.values_mut().filter(|e| &e.conversation == from) {
            entry.conversation = to.clone();
        }
        for state in self.approvals.values_mut().filter(|s| &s.conversation == from) {
            state.conversation = to.clone();
        }
    }

    /// Drop every entry of a conversation
    pub(crate) fn forget_conversation(&mut self, conversation: &ConversationKey) {
        self.calls.retain(|_, e| &e.conversation != conversation);
        self.approvals.retain(|_, s| &s.conversation != conversation);
    }
}
