//! Protocol dispatcher
//!
//! Applies inbound frames and user actions to the conversation store. The
//! dispatcher performs no I/O: frames produce [`Effect`]s, user actions
//! produce an outbound command for the caller to send.

use super::effect::Effect;
use super::pending::PendingBuffer;
use super::state::{ConversationKey, ConversationState, LoadStatus, Transcript};
use super::store::ConversationStore;
use super::tracker::{ApprovalOutcome, InvocationStatus, Resolution};
use crate::error::LoadError;
use crate::protocol::{
    classify, classify_tool_result, ConnectionStatus, ControlFrame, Frame, IgnoreReason,
    LoadedConversation, OutboundCommand, ToolResultKind,
};
use crate::title_generator::{generate_title, DEFAULT_TITLE};
use chrono::Local;
use serde_json::Value;
use thiserror::Error;

/// Errors returned to user actions
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Not connected ({0:?}), try again once the connection is back")]
    Disconnected(ConnectionStatus),
    #[error("Agent is busy, wait for the reply or cancel it first")]
    AgentBusy,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
    #[error("Operation {0} is not awaiting approval")]
    ApprovalNotPending(String),
}

/// Result of a user action
#[derive(Debug, Default)]
pub struct ActionResult {
    /// Command to send, `None` when the action was a no-op
    pub outbound: Option<OutboundCommand>,
    pub effects: Vec<Effect>,
}

impl ActionResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn send(command: OutboundCommand) -> Self {
        Self {
            outbound: Some(command),
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Whether a selected conversation should be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDecision {
    Fetch,
    Skip,
}

/// Single mutator of the conversation store
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dispatcher {
    store: ConversationStore,
    connection: ConnectionStatus,
    /// Conversation that unaddressed text deltas belong to
    stream_target: Option<ConversationKey>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn stream_target(&self) -> Option<&ConversationKey> {
        self.stream_target.as_ref()
    }

    pub fn set_connection_status(&mut self, status: ConnectionStatus) -> Vec<Effect> {
        if self.connection == status {
            return vec![];
        }
        tracing::info!(from = ?self.connection, to = ?status, "Connection status changed");
        self.connection = status;
        vec![Effect::ConnectionChanged(status)]
    }

    // ========================================================================
    // Inbound frames
    // ========================================================================

    /// Apply one raw inbound frame. Never fails; frames that cannot be applied
    /// are logged and dropped.
    pub fn on_frame(&mut self, raw: &str) -> Vec<Effect> {
        match classify(raw) {
            Frame::Text(delta) => self.apply_text(&delta),
            Frame::Control(frame) => self.apply(frame),
            Frame::Ignored(IgnoreReason::UnknownType(frame_type)) => {
                tracing::debug!(frame_type = %frame_type, "Ignoring unknown frame type");
                vec![]
            }
            Frame::Ignored(IgnoreReason::Malformed { frame_type, error }) => {
                tracing::warn!(frame_type = %frame_type, error = %error, "Dropping malformed frame");
                vec![]
            }
        }
    }

    fn apply(&mut self, frame: ControlFrame) -> Vec<Effect> {
        let target = self.resolve_target(frame.conversation_id());

        match frame {
            ControlFrame::ConversationCreated {
                conversation_id,
                title,
            } => self.conversation_created(conversation_id, title),

            ControlFrame::MessageComplete { .. } => {
                let Some((key, transcript)) = self.target_transcript(target, "message_complete")
                else {
                    return vec![];
                };
                if transcript.complete_message() {
                    vec![Effect::MessageFinished { conversation: key }]
                } else {
                    vec![]
                }
            }

            ControlFrame::TextBlockComplete { .. } => {
                if let Some((_, transcript)) = self.target_transcript(target, "text_block_complete")
                {
                    transcript.close_text_block();
                }
                vec![]
            }

            ControlFrame::ToolCall {
                tool_id,
                tool_name,
                input,
                ..
            } => self.tool_call(target, tool_id, tool_name, input),

            ControlFrame::ToolResult {
                tool_id, result, ..
            } => self.tool_result(&tool_id, result),

            ControlFrame::ToolApprovalResult {
                operation_id,
                status,
                result,
            } => self.approval_result(&operation_id, status.into(), result),

            ControlFrame::TaskStarted { task_id, .. } => {
                let Some((key, transcript)) = self.target_transcript(target, "task_started") else {
                    return vec![];
                };
                if transcript.active_task_id.as_deref() == Some(task_id.as_str()) {
                    return vec![];
                }
                tracing::debug!(conv_id = %key, task_id = %task_id, "Background task started");
                transcript.active_task_id = Some(task_id);
                vec![Effect::transcript_changed(key)]
            }

            ControlFrame::Error { message, .. } => {
                let Some((key, transcript)) = self.target_transcript(target, "error") else {
                    return vec![];
                };
                tracing::warn!(conv_id = %key, error = %message, "Server reported an error");
                transcript.fail(message.clone());
                vec![Effect::StreamFailed {
                    conversation: key,
                    message,
                }]
            }
        }
    }

    fn apply_text(&mut self, delta: &str) -> Vec<Effect> {
        let target = self.stream_target.clone();
        let Some((key, transcript)) = self.target_transcript(target, "text delta") else {
            return vec![];
        };
        if transcript.append_text(delta) {
            vec![Effect::TextAppended {
                conversation: key,
                delta: delta.to_string(),
            }]
        } else {
            vec![]
        }
    }

    fn conversation_created(&mut self, conversation_id: String, title: Option<String>) -> Vec<Effect> {
        if self.store.is_acknowledged(&conversation_id) {
            tracing::debug!(conv_id = %conversation_id, "Conversation already acknowledged");
            return vec![];
        }
        self.store.acknowledged.insert(conversation_id.clone());

        let conversation = self
            .store
            .pending
            .flush_into(&conversation_id, title, DEFAULT_TITLE);
        let key = ConversationKey::id(conversation_id.as_str());

        self.store
            .tracker
            .rekey_conversation(&ConversationKey::Pending, &key);
        if self.stream_target == Some(ConversationKey::Pending) {
            self.stream_target = Some(key);
        }

        let title = conversation.title.clone();
        tracing::info!(
            conv_id = %conversation_id,
            title = %title,
            messages = conversation.transcript.messages.len(),
            "Conversation created"
        );
        self.store
            .conversations
            .insert(conversation_id.clone(), conversation);

        vec![Effect::ConversationCreated {
            conversation_id,
            title,
        }]
    }

    fn tool_call(
        &mut self,
        target: Option<ConversationKey>,
        tool_id: String,
        tool_name: String,
        input: Value,
    ) -> Vec<Effect> {
        if self.store.tracker.call(&tool_id).is_some() {
            tracing::debug!(tool_id = %tool_id, "Duplicate tool_call ignored");
            return vec![];
        }
        let Some((key, transcript)) = self.target_transcript(target, "tool_call") else {
            return vec![];
        };

        transcript.push_tool_call(&tool_id, &tool_name, input.clone());
        self.store
            .tracker
            .start(&tool_id, &tool_name, input, key.clone());

        vec![Effect::ToolStarted {
            conversation: key,
            tool_id,
            tool_name,
        }]
    }

    fn tool_result(&mut self, tool_id: &str, result: Value) -> Vec<Effect> {
        let Some(entry) = self.store.tracker.call(tool_id) else {
            tracing::debug!(tool_id = %tool_id, "tool_result for unknown tool call");
            return vec![];
        };
        let key = entry.conversation.clone();
        let tool_name = entry.tool_name.clone();

        let approval = match classify_tool_result(&result) {
            ToolResultKind::PendingApproval { operation_id } => Some(operation_id),
            ToolResultKind::Complete => None,
        };

        let Some(transcript) = self.store.transcript_mut(&key) else {
            tracing::debug!(tool_id = %tool_id, conv_id = %key, "tool_result for closed conversation");
            return vec![];
        };
        let Some(changed) = transcript.attach_tool_result(tool_id, result, approval.clone()) else {
            tracing::debug!(tool_id = %tool_id, conv_id = %key, "No tool block for tool_result");
            return vec![];
        };
        self.store.tracker.complete(tool_id);

        let mut effects = vec![];
        if changed {
            effects.push(Effect::ToolFinished {
                conversation: key.clone(),
                tool_id: tool_id.to_string(),
            });
        }
        if let Some(operation_id) = approval {
            if self
                .store
                .tracker
                .request_approval(&operation_id, &tool_name, tool_id, key.clone())
            {
                tracing::info!(
                    conv_id = %key,
                    tool_id = %tool_id,
                    operation_id = %operation_id,
                    "Tool awaiting approval"
                );
                effects.push(Effect::ApprovalRequested {
                    conversation: key,
                    operation_id,
                    tool_name,
                });
            }
        }
        effects
    }

    fn approval_result(
        &mut self,
        operation_id: &str,
        status: InvocationStatus,
        result: Option<Value>,
    ) -> Vec<Effect> {
        match self
            .store
            .tracker
            .resolve(operation_id, ApprovalOutcome { status, result })
        {
            Some(Resolution::Applied) => {
                tracing::info!(operation_id = %operation_id, status = ?status, "Approval resolved");
                vec![Effect::ApprovalUpdated {
                    operation_id: operation_id.to_string(),
                    status,
                    is_processing: false,
                }]
            }
            Some(Resolution::AlreadyResolved(outcome)) => {
                tracing::debug!(
                    operation_id = %operation_id,
                    stored = ?outcome.status,
                    "Approval already resolved"
                );
                vec![]
            }
            None => {
                tracing::debug!(operation_id = %operation_id, "Approval result for unknown operation");
                vec![]
            }
        }
    }

    /// Conversation an inbound control frame applies to
    fn resolve_target(&self, conversation_id: Option<&str>) -> Option<ConversationKey> {
        match conversation_id {
            Some(id) if self.store.contains(id) => Some(ConversationKey::id(id)),
            // Id assigned server-side but conversation_created not seen yet
            Some(_) if self.stream_target == Some(ConversationKey::Pending) => {
                Some(ConversationKey::Pending)
            }
            Some(_) => None,
            None => self.stream_target.clone(),
        }
    }

    fn target_transcript(
        &mut self,
        target: Option<ConversationKey>,
        what: &'static str,
    ) -> Option<(ConversationKey, &mut Transcript)> {
        let Some(key) = target else {
            tracing::debug!(frame = what, "No conversation for frame");
            return None;
        };
        if let Some(transcript) = self.store.transcript_mut(&key) {
            Some((key, transcript))
        } else {
            tracing::debug!(frame = what, conv_id = %key, "Frame for unknown conversation");
            None
        }
    }

    // ========================================================================
    // User actions
    // ========================================================================

    /// Send a user message. `ConversationKey::Pending` starts a new conversation.
    ///
    /// The user message and thinking flag are recorded before the command is
    /// returned, so the caller never waits on the network to show them.
    pub fn send_message(
        &mut self,
        key: &ConversationKey,
        text: &str,
    ) -> Result<ActionResult, DispatchError> {
        if text.trim().is_empty() {
            return Err(DispatchError::EmptyMessage);
        }
        self.require_connected()?;

        match key {
            ConversationKey::Pending => {
                if !self.store.pending.is_empty() {
                    return Err(DispatchError::AgentBusy);
                }
                self.store.pending.title = Some(generate_title(text));
                self.store.pending.transcript.push_user_message(text);
            }
            ConversationKey::Id(id) => {
                let conversation = self
                    .store
                    .conversations
                    .get_mut(id)
                    .ok_or_else(|| DispatchError::UnknownConversation(id.clone()))?;
                if conversation.transcript.is_thinking {
                    return Err(DispatchError::AgentBusy);
                }
                conversation.transcript.push_user_message(text);
                conversation.has_local_messages = true;
            }
        }

        self.store.set_thinking(key);
        self.stream_target = Some(key.clone());
        tracing::debug!(conv_id = %key, "User message sent");

        let command = OutboundCommand::send_message(
            text,
            key.durable_id().map(str::to_string),
            Local::now(),
        );
        Ok(ActionResult::send(command).with_effect(Effect::transcript_changed(key.clone())))
    }

    /// Cancel the conversation's background task. No-op when none is running.
    pub fn cancel_task(&mut self, key: &ConversationKey) -> Result<ActionResult, DispatchError> {
        let connection = self.connection;
        let transcript = self
            .store
            .transcript_mut(key)
            .ok_or_else(|| DispatchError::UnknownConversation(key.to_string()))?;

        let Some(task_id) = transcript.active_task_id.clone() else {
            tracing::debug!(conv_id = %key, "No active task to cancel");
            return Ok(ActionResult::none());
        };
        if !connection.accepts_outbound() {
            return Err(DispatchError::Disconnected(connection));
        }

        // Later frames for the task still apply; only the thinking state is dropped
        transcript.is_thinking = false;
        tracing::info!(conv_id = %key, task_id = %task_id, "Cancelling task");

        Ok(ActionResult::send(OutboundCommand::Cancel { task_id })
            .with_effect(Effect::transcript_changed(key.clone())))
    }

    pub fn approve_tool(
        &mut self,
        operation_id: &str,
        options: Option<Value>,
    ) -> Result<ActionResult, DispatchError> {
        self.require_connected()?;
        let command = self.store.tracker.approve(operation_id, options)?;
        Ok(Self::submitted(operation_id, command))
    }

    pub fn reject_tool(&mut self, operation_id: &str) -> Result<ActionResult, DispatchError> {
        self.require_connected()?;
        let command = self.store.tracker.cancel(operation_id)?;
        Ok(Self::submitted(operation_id, command))
    }

    fn submitted(operation_id: &str, command: OutboundCommand) -> ActionResult {
        tracing::info!(operation_id = %operation_id, command = command.kind(), "Approval submitted");
        ActionResult::send(command).with_effect(Effect::ApprovalUpdated {
            operation_id: operation_id.to_string(),
            status: InvocationStatus::PendingApproval,
            is_processing: true,
        })
    }

    /// Reopen an approval whose decision never reached the server
    pub fn fail_approval(&mut self, operation_id: &str, message: &str) -> Vec<Effect> {
        if !self.store.tracker.withdraw(operation_id) {
            return vec![];
        }
        tracing::warn!(operation_id = %operation_id, error = %message, "Approval not delivered");
        vec![Effect::ApprovalUpdated {
            operation_id: operation_id.to_string(),
            status: InvocationStatus::PendingApproval,
            is_processing: false,
        }]
    }

    fn require_connected(&self) -> Result<(), DispatchError> {
        if self.connection.accepts_outbound() {
            Ok(())
        } else {
            Err(DispatchError::Disconnected(self.connection))
        }
    }

    /// End the turn started by a message the connection failed to deliver.
    ///
    /// A pending conversation is discarded since the server never saw it.
    pub fn fail_turn(&mut self, key: &ConversationKey, message: String) -> Vec<Effect> {
        tracing::warn!(conv_id = %key, error = %message, "Message not delivered");
        if *key == ConversationKey::Pending {
            return self.close_conversation(key);
        }
        let Some(transcript) = self.store.transcript_mut(key) else {
            return vec![];
        };
        transcript.fail(message.clone());
        vec![Effect::StreamFailed {
            conversation: key.clone(),
            message,
        }]
    }

    /// Drop local state for a conversation. Later frames for it are misses.
    pub fn close_conversation(&mut self, key: &ConversationKey) -> Vec<Effect> {
        let existed = match key {
            ConversationKey::Pending => {
                let existed = !self.store.pending.is_empty();
                self.store.pending = PendingBuffer::default();
                existed
            }
            ConversationKey::Id(id) => self.store.conversations.remove(id).is_some(),
        };
        self.store.tracker.forget_conversation(key);
        if self.stream_target.as_ref() == Some(key) {
            self.stream_target = None;
        }

        if existed {
            vec![Effect::ConversationClosed {
                conversation: key.clone(),
            }]
        } else {
            vec![]
        }
    }

    // ========================================================================
    // History loading
    // ========================================================================

    /// Decide whether selecting a conversation should fetch its history.
    ///
    /// Fetching is skipped while the conversation holds live state or a fetch
    /// is already in flight.
    pub fn begin_load(&mut self, conversation_id: &str) -> LoadDecision {
        let conversation = self
            .store
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationState::new(conversation_id, DEFAULT_TITLE));

        if conversation.holds_live_state() {
            tracing::debug!(conv_id = %conversation_id, "Skipping load, conversation is live");
            return LoadDecision::Skip;
        }
        if conversation.load_status == LoadStatus::Loading {
            return LoadDecision::Skip;
        }

        conversation.load_status = LoadStatus::Loading;
        LoadDecision::Fetch
    }

    /// Apply a finished fetch, unless live state arrived while it was in flight
    pub fn finish_load(
        &mut self,
        conversation_id: &str,
        outcome: Result<LoadedConversation, LoadError>,
    ) -> Vec<Effect> {
        let Some(conversation) = self.store.conversations.get_mut(conversation_id) else {
            tracing::debug!(conv_id = %conversation_id, "Load finished for closed conversation");
            return vec![];
        };

        if conversation.holds_live_state() {
            tracing::debug!(conv_id = %conversation_id, "Discarding stale history");
            conversation.load_status = LoadStatus::NotLoaded;
        } else {
            match outcome {
                Ok(loaded) => {
                    if let Some(title) = loaded.title {
                        conversation.title = title;
                    }
                    conversation.transcript = Transcript::from_loaded(loaded.messages);
                    conversation.load_status = LoadStatus::Loaded;
                }
                Err(e) => {
                    tracing::warn!(conv_id = %conversation_id, error = %e, "Failed to load conversation");
                    conversation.transcript = Transcript::default();
                    conversation.load_status = LoadStatus::Failed { message: e.message };
                }
            }
        }

        vec![Effect::ConversationLoaded {
            conversation_id: conversation_id.to_string(),
            status: conversation.load_status.clone(),
        }]
    }
}
