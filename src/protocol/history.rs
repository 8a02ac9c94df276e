//! Persisted conversation payload returned by the loading endpoint

use crate::state_machine::{ContentBlock, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedConversation {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<LoadedMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content_blocks: Vec<ContentBlock>,
    pub created_at: DateTime<Utc>,
}
