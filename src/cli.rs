//! Line-oriented terminal front end
//!
//! Parses stdin commands and renders session effects as plain text.

use crate::state_machine::{
    ContentBlock, ConversationKey, ConversationState, Effect, InvocationStatus, LoadStatus, Role,
};

pub const HELP: &str = "Commands: <text> send | /new | /open <id> | /cancel | /approve <op> | /deny <op> | /quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    Open(String),
    Cancel,
    Approve(String),
    Deny(String),
    Quit,
    Help,
    /// Unrecognized or incomplete command, with a usage hint
    Invalid(String),
}

impl Command {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Send(line.to_string()));
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::to_string);

        let command = match (name, arg) {
            ("new", _) => Command::New,
            ("cancel", _) => Command::Cancel,
            ("quit" | "exit", _) => Command::Quit,
            ("help", _) => Command::Help,
            ("open", Some(id)) => Command::Open(id),
            ("approve", Some(op)) => Command::Approve(op),
            ("deny", Some(op)) => Command::Deny(op),
            ("open" | "approve" | "deny", None) => {
                Command::Invalid(format!("/{name} needs an argument"))
            }
            _ => Command::Invalid(format!("Unknown command /{name}")),
        };
        Some(command)
    }
}

/// Text to print for an effect, or `None` if it is not shown
pub fn render_effect(effect: &Effect, current: &ConversationKey) -> Option<String> {
    if let Some(conversation) = effect.conversation() {
        if conversation != current {
            return None;
        }
    }

    match effect {
        Effect::TextAppended { delta, .. } => Some(delta.clone()),
        Effect::ToolStarted {
            tool_id, tool_name, ..
        } => Some(format!("\n[tool {tool_name} ({tool_id}) running]\n")),
        Effect::ToolFinished { tool_id, .. } => Some(format!("[tool {tool_id} finished]\n")),
        Effect::ApprovalRequested {
            operation_id,
            tool_name,
            ..
        } => Some(format!(
            "[{tool_name} needs approval: /approve {operation_id} or /deny {operation_id}]\n"
        )),
        Effect::ApprovalUpdated {
            operation_id,
            status,
            is_processing,
        } => Some(if *is_processing {
            format!("[operation {operation_id} submitted]\n")
        } else {
            format!("[operation {operation_id} {}]\n", status_label(*status))
        }),
        Effect::MessageFinished { .. } => Some("\n".to_string()),
        Effect::StreamFailed { message, .. } => Some(format!("\n[error: {message}]\n")),
        Effect::ConversationCreated {
            conversation_id,
            title,
        } => Some(format!("[conversation {conversation_id}: {title}]\n")),
        Effect::ConversationLoaded {
            conversation_id,
            status: LoadStatus::Failed { message },
        } => Some(format!("[could not load {conversation_id}: {message}]\n")),
        Effect::ConversationLoaded {
            conversation_id,
            status: LoadStatus::Loading,
        } => Some(format!("[loading {conversation_id}...]\n")),
        Effect::ConnectionChanged(status) => Some(format!("[connection {status:?}]\n")),
        Effect::ConversationLoaded { .. }
        | Effect::TranscriptChanged { .. }
        | Effect::ConversationClosed { .. } => None,
    }
}

fn status_label(status: InvocationStatus) -> &'static str {
    match status {
        InvocationStatus::Running => "running",
        InvocationStatus::PendingApproval => "awaiting approval",
        InvocationStatus::Completed => "completed",
        InvocationStatus::Failed => "failed",
        InvocationStatus::Canceled => "canceled",
        InvocationStatus::Expired => "expired",
    }
}

/// Full transcript of a conversation
pub fn render_conversation(conversation: &ConversationState) -> String {
    let mut out = format!("== {} ({}) ==\n", conversation.title, conversation.id);
    for message in &conversation.transcript.messages {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        out.push_str(speaker);
        out.push_str(": ");
        for block in &message.blocks {
            match block {
                ContentBlock::Text { text, .. } => out.push_str(text),
                ContentBlock::ToolUse { tool_name, id, .. } => {
                    out.push_str(&format!("[tool {tool_name} ({id})]"));
                }
            }
        }
        out.push('\n');
    }
    out
}
