//! Client configuration from environment variables

use std::time::Duration;

const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8000/ws";
const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";
const DEFAULT_USER_ID: &str = "local";
const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base WebSocket URL; the user id is appended as the last path segment
    pub ws_url: String,
    pub api_url: String,
    pub user_id: String,
    pub load_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let load_timeout_secs = lookup("PARLEY_LOAD_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LOAD_TIMEOUT_SECS);

        Self {
            ws_url: lookup("PARLEY_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            api_url: lookup("PARLEY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            user_id: lookup("PARLEY_USER_ID").unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            load_timeout: Duration::from_secs(load_timeout_secs),
        }
    }

    /// Per-user connection URL
    pub fn connection_url(&self) -> String {
        format!("{}/{}", self.ws_url.trim_end_matches('/'), self.user_id)
    }
}
