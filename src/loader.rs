//! HTTP loader for persisted conversations

use crate::error::LoadError;
use crate::protocol::LoadedConversation;
use crate::runtime::ConversationLoader;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Fetches `GET {api_url}/conversations/{id}`
pub struct HttpConversationLoader {
    client: Client,
    api_url: String,
}

impl HttpConversationLoader {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, LoadError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoadError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn conversation_url(&self, conversation_id: &str) -> String {
        format!("{}/conversations/{conversation_id}", self.api_url)
    }
}

fn classify_error(status: StatusCode, body: &str) -> LoadError {
    if status == StatusCode::NOT_FOUND {
        LoadError::not_found(format!("Conversation not found: {body}"))
    } else {
        LoadError::server_error(format!("HTTP {status}: {body}"))
    }
}

#[async_trait]
impl ConversationLoader for HttpConversationLoader {
    async fn load(&self, conversation_id: &str) -> Result<LoadedConversation, LoadError> {
        let url = self.conversation_url(conversation_id);
        tracing::debug!(conv_id = %conversation_id, url = %url, "Fetching conversation");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                LoadError::timeout(format!("Request timeout: {e}"))
            } else {
                LoadError::network(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LoadError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| LoadError::decode(format!("Failed to parse conversation: {e}")))
    }
}
