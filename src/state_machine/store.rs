//! Conversation store
//!
//! Owns every conversation, the pending buffer and the tool tracker. Read
//! access is public; mutation happens only through the dispatcher.

use super::pending::PendingBuffer;
use super::state::{ContentBlock, ConversationKey, ConversationState, Transcript};
use super::tracker::{ToolInvocationState, ToolTracker};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConversationStore {
    pub(super) conversations: HashMap<String, ConversationState>,
    pub(super) pending: PendingBuffer,
    pub(super) tracker: ToolTracker,
    /// Ids named by a `conversation_created` frame; survives close
    pub(super) acknowledged: HashSet<String>,
}

impl ConversationStore {
    pub fn conversation(&self, conversation_id: &str) -> Option<&ConversationState> {
        self.conversations.get(conversation_id)
    }

    pub fn conversations(&self) -> impl Iterator<Item = &ConversationState> {
        self.conversations.values()
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.conversations.contains_key(conversation_id)
    }

    /// Whether the server already announced this conversation
    pub fn is_acknowledged(&self, conversation_id: &str) -> bool {
        self.acknowledged.contains(conversation_id) || self.contains(conversation_id)
    }

    pub fn pending(&self) -> &PendingBuffer {
        &self.pending
    }

    pub fn tracker(&self) -> &ToolTracker {
        &self.tracker
    }

    pub fn transcript(&self, key: &ConversationKey) -> Option<&Transcript> {
        match key {
            ConversationKey::Pending => Some(&self.pending.transcript),
            ConversationKey::Id(id) => self.conversations.get(id).map(|c| &c.transcript),
        }
    }

    pub(super) fn transcript_mut(&mut self, key: &ConversationKey) -> Option<&mut Transcript> {
        match key {
            ConversationKey::Pending => Some(&mut self.pending.transcript),
            ConversationKey::Id(id) => self.conversations.get_mut(id).map(|c| &mut c.transcript),
        }
    }

    /// Approval state attached to a tool block, once its result named an operation
    pub fn approval_for_block(
        &self,
        key: &ConversationKey,
        tool_call_id: &str,
    ) -> Option<&ToolInvocationState> {
        match self.transcript(key)?.find_tool_block(tool_call_id)? {
            ContentBlock::ToolUse {
                operation_id: Some(operation_id),
                ..
            } => self.tracker.approval(operation_id),
            _ => None,
        }
    }

    /// Conversations currently waiting on the agent
    pub fn thinking(&self) -> Vec<ConversationKey> {
        let pending = self
            .pending
            .is_thinking()
            .then_some(ConversationKey::Pending);
        pending
            .into_iter()
            .chain(
                self.conversations
                    .values()
                    .filter(|c| c.transcript.is_thinking)
                    .map(|c| ConversationKey::id(c.id.as_str())),
            )
            .collect()
    }

    /// Mark one conversation thinking; only one may think at a time
    pub(super) fn set_thinking(&mut self, key: &ConversationKey) {
        self.pending.transcript.is_thinking = false;
        for conversation in self.conversations.values_mut() {
            conversation.transcript.is_thinking = false;
        }
        if let Some(transcript) = self.transcript_mut(key) {
            transcript.is_thinking = true;
        }
    }
}
