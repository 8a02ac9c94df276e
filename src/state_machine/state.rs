//! Transcript state types

use crate::protocol::LoadedMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// Content blocks
// ============================================================================

/// Lifecycle of a `tool_use` block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Running,
    /// Persisted blocks carry no status and are always finished
    #[default]
    Complete,
}

/// Atomic unit of an assistant turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        id: String,
        text: String,
    },
    ToolUse {
        /// Tool-call id
        id: String,
        #[serde(alias = "name")]
        tool_name: String,
        #[serde(default)]
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default)]
        status: BlockStatus,
        /// Approval operation attached through a pending-approval result
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operation_id: Option<String>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
        }
    }

    pub fn tool_use(id: impl Into<String>, tool_name: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            tool_name: tool_name.into(),
            input,
            result: None,
            status: BlockStatus::Running,
            operation_id: None,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ContentBlock::Text { id, .. } | ContentBlock::ToolUse { id, .. } => id,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text, .. } => Some(text),
            ContentBlock::ToolUse { .. } => None,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
    pub created_at: DateTime<Utc>,
    pub is_streaming: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            blocks: vec![ContentBlock::text(text)],
            created_at: Utc::now(),
            is_streaming: false,
        }
    }

    fn assistant() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            blocks: Vec::new(),
            created_at: Utc::now(),
            is_streaming: true,
        }
    }

    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        self.blocks.iter().filter_map(ContentBlock::as_text).collect()
    }
}

impl From<LoadedMessage> for Message {
    fn from(loaded: LoadedMessage) -> Self {
        Self {
            id: loaded.id,
            role: loaded.role,
            blocks: loaded.content_blocks,
            created_at: loaded.created_at,
            is_streaming: false,
        }
    }
}

// ============================================================================
// Transcript
// ============================================================================

/// Which block of the in-flight assistant message accepts the next text delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnCursor {
    /// No assistant message in flight
    #[default]
    Idle,
    /// Assistant message in flight, no open text block
    Between { message: usize },
    /// Text block `block` of message `message` is open for appends
    Text { message: usize, block: usize },
}

impl TurnCursor {
    pub fn message(self) -> Option<usize> {
        match self {
            TurnCursor::Idle => None,
            TurnCursor::Between { message } | TurnCursor::Text { message, .. } => Some(message),
        }
    }
}

/// Ordered messages plus the streaming flags of one conversation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transcript {
    pub messages: Vec<Message>,
    pub is_thinking: bool,
    pub active_task_id: Option<String>,
    /// Last error reported by the server for this conversation
    pub last_error: Option<String>,
    cursor: TurnCursor,
}

impl Transcript {
    pub fn from_loaded(messages: Vec<LoadedMessage>) -> Self {
        Self {
            messages: messages.into_iter().map(Message::from).collect(),
            ..Self::default()
        }
    }

    pub fn cursor(&self) -> TurnCursor {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// An assistant message is receiving content
    pub fn is_streaming(&self) -> bool {
        self.cursor.message().is_some()
    }

    /// Thinking, streaming or running a task
    pub fn is_live(&self) -> bool {
        self.is_thinking || self.is_streaming() || self.active_task_id.is_some()
    }

    pub fn find_tool_block(&self, tool_id: &str) -> Option<&ContentBlock> {
        self.messages
            .iter()
            .rev()
            .flat_map(|m| m.blocks.iter())
            .find(|b| matches!(b, ContentBlock::ToolUse { id, .. } if id == tool_id))
    }

    /// Append the user's message, finishing any assistant message still in flight
    pub(crate) fn push_user_message(&mut self, text: &str) {
        self.finish_in_flight();
        self.messages.push(Message::user(text));
        self.last_error = None;
    }

    /// Apply a text delta. Returns true if the transcript changed.
    pub(crate) fn append_text(&mut self, delta: &str) -> bool {
        if delta.is_empty() {
            return false;
        }

        if let TurnCursor::Text { message, block } = self.cursor {
            if let Some(ContentBlock::Text { text, .. }) = self.messages[message].blocks.get_mut(block) {
                text.push_str(delta);
            }
        } else {
            let message = self.in_flight_message();
            let blocks = &mut self.messages[message].blocks;
            blocks.push(ContentBlock::text(delta));
            self.cursor = TurnCursor::Text {
                message,
                block: blocks.len() - 1,
            };
        }

        self.is_thinking = false;
        true
    }

    /// Close the open text block so the next delta starts a new one
    pub(crate) fn close_text_block(&mut self) -> bool {
        match self.cursor {
            TurnCursor::Text { message, .. } => {
                self.cursor = TurnCursor::Between { message };
                true
            }
            TurnCursor::Between { .. } | TurnCursor::Idle => false,
        }
    }

    pub(crate) fn push_tool_call(&mut self, tool_id: &str, tool_name: &str, input: Value) {
        let message = self.in_flight_message();
        self.messages[message]
            .blocks
            .push(ContentBlock::tool_use(tool_id, tool_name, input));
        self.cursor = TurnCursor::Between { message };
        self.is_thinking = false;
    }

    /// Attach a result to the `tool_use` block with this tool-call id.
    ///
    /// Returns `None` if no such block exists, otherwise whether anything changed.
    pub(crate) fn attach_tool_result(
        &mut self,
        tool_id: &str,
        payload: Value,
        approval_operation: Option<String>,
    ) -> Option<bool> {
        let block = self
            .messages
            .iter_mut()
            .rev()
            .flat_map(|m| m.blocks.iter_mut())
            .find(|b| matches!(b, ContentBlock::ToolUse { id, .. } if id == tool_id))?;

        let ContentBlock::ToolUse {
            result,
            status,
            operation_id,
            ..
        } = block
        else {
            return None;
        };

        let mut changed = false;
        if result.as_ref() != Some(&payload) {
            *result = Some(payload);
            changed = true;
        }
        if *status != BlockStatus::Complete {
            *status = BlockStatus::Complete;
            changed = true;
        }
        if let Some(op) = approval_operation {
            if operation_id.as_deref() != Some(op.as_str()) {
                *operation_id = Some(op);
                changed = true;
            }
        }
        Some(changed)
    }

    /// End the assistant turn. Returns true if the transcript changed.
    pub(crate) fn complete_message(&mut self) -> bool {
        let was_live = self.is_live();
        self.finish_in_flight();
        self.is_thinking = false;
        self.active_task_id = None;
        was_live
    }

    /// End the assistant turn with a server-reported error
    pub(crate) fn fail(&mut self, message: String) {
        self.complete_message();
        self.last_error = Some(message);
    }

    fn in_flight_message(&mut self) -> usize {
        if let Some(message) = self.cursor.message() {
            return message;
        }
        self.messages.push(Message::assistant());
        let message = self.messages.len() - 1;
        self.cursor = TurnCursor::Between { message };
        message
    }

    fn finish_in_flight(&mut self) {
        if let Some(message) = self.cursor.message() {
            self.messages[message].is_streaming = false;
        }
        self.cursor = TurnCursor::Idle;
    }

    /// Check the streaming invariants; used by tests
    pub fn check_invariants(&self) -> Result<(), String> {
        let streaming: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_streaming)
            .map(|(i, _)| i)
            .collect();

        match self.cursor {
            TurnCursor::Idle => {
                if !streaming.is_empty() {
                    return Err(format!("idle cursor but messages {streaming:?} streaming"));
                }
            }
            TurnCursor::Between { message } | TurnCursor::Text { message, .. } => {
                if streaming != [message] {
                    return Err(format!(
                        "cursor on message {message} but streaming set is {streaming:?}"
                    ));
                }
                if message + 1 != self.messages.len() {
                    return Err(format!("in-flight message {message} is not the last message"));
                }
                if self.messages[message].role != Role::Assistant {
                    return Err("in-flight message is not an assistant message".to_string());
                }
            }
        }

        if let TurnCursor::Text { message, block } = self.cursor {
            let blocks = &self.messages[message].blocks;
            if block + 1 != blocks.len() {
                return Err(format!("open text block {block} is not the last block"));
            }
            if !matches!(blocks[block], ContentBlock::Text { .. }) {
                return Err(format!("open block {block} is not a text block"));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Conversations
// ============================================================================

/// Key of a conversation in the store: a durable id, or the pending conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKey {
    Pending,
    Id(String),
}

impl ConversationKey {
    pub fn id(id: impl Into<String>) -> Self {
        ConversationKey::Id(id.into())
    }

    /// Durable id, `None` for the pending conversation
    pub fn durable_id(&self) -> Option<&str> {
        match self {
            ConversationKey::Pending => None,
            ConversationKey::Id(id) => Some(id),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKey::Pending => f.write_str("<pending>"),
            ConversationKey::Id(id) => f.write_str(id),
        }
    }
}

/// Hydration state of a conversation selected from history
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoadStatus {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    Failed { message: String },
}

/// A conversation with a durable id
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    pub id: String,
    pub title: String,
    pub transcript: Transcript,
    pub load_status: LoadStatus,
    /// Transcript was built from the live stream in this session and is
    /// authoritative over server history
    pub has_local_messages: bool,
}

impl ConversationState {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            transcript: Transcript::default(),
            load_status: LoadStatus::NotLoaded,
            has_local_messages: false,
        }
    }

    /// Fetching history would clobber live state
    pub fn holds_live_state(&self) -> bool {
        self.has_local_messages || self.transcript.is_live()
    }
}
