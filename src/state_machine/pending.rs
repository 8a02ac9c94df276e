//! Holding area for a conversation that has no durable id yet

use super::state::{ConversationState, Transcript};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PendingBuffer {
    pub transcript: Transcript,
    /// Title computed from the first message, applied once the id arrives
    pub title: Option<String>,
}

impl PendingBuffer {
    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }

    pub fn is_thinking(&self) -> bool {
        self.transcript.is_thinking
    }

    /// Empty the buffer into a conversation with the assigned id.
    ///
    /// The cached title wins over the server-provided one.
    pub(crate) fn flush_into(
        &mut self,
        conversation_id: &str,
        server_title: Option<String>,
        default_title: &str,
    ) -> ConversationState {
        let PendingBuffer { transcript, title } = std::mem::take(self);
        let title = title
            .or(server_title)
            .unwrap_or_else(|| default_title.to_string());

        let mut conversation = ConversationState::new(conversation_id, title);
        conversation.has_local_messages = !transcript.is_empty();
        conversation.transcript = transcript;
        conversation
    }
}
