//! Conversation title generation
//!
//! Titles are computed locally from the first user message so the
//! conversation never shows a placeholder once it has content.

/// Title used when the message yields nothing usable
pub const DEFAULT_TITLE: &str = "New conversation";

/// Questions up to this length are used verbatim
const MAX_QUESTION_LENGTH: usize = 50;
const MAX_TITLE_WORDS: usize = 6;
const MAX_TITLE_LENGTH: usize = 40;
const ELLIPSIS: &str = "...";

/// Generate a title for a conversation from its first message.
pub fn generate_title(message_text: &str) -> String {
    let trimmed = message_text.trim();
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }

    if trimmed.ends_with('?') && trimmed.chars().count() <= MAX_QUESTION_LENGTH {
        return trimmed.to_string();
    }

    let words: Vec<&str> = trimmed.split_whitespace().collect();
    let joined = words
        .iter()
        .take(MAX_TITLE_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    let truncated = truncate_chars(&joined, MAX_TITLE_LENGTH);
    let shortened = words.len() > MAX_TITLE_WORDS || truncated.len() < joined.len();

    if shortened {
        format!("{truncated}{ELLIPSIS}")
    } else {
        truncated
    }
}

/// Cut to at most `max` characters, dropping trailing whitespace
fn truncate_chars(text: &str, max: usize) -> String {
    let cut: String = text.chars().take(max).collect();
    cut.trim_end().to_string()
}
