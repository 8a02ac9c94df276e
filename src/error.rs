//! Collaborator error types

use thiserror::Error;

/// Errors from the persistent connection
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    Connect(String),
    #[error("Connection is not open")]
    NotConnected,
    #[error("Connection closed")]
    Closed,
    #[error("Outbound queue is full")]
    Backlogged,
}

/// Conversation loading error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LoadError {
    pub kind: LoadErrorKind,
    pub message: String,
}

impl LoadError {
    pub fn new(kind: LoadErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LoadErrorKind::Network, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(LoadErrorKind::NotFound, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(LoadErrorKind::ServerError, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(LoadErrorKind::Decode, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(LoadErrorKind::Timeout, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// Request never reached the server
    Network,
    /// Conversation does not exist (404)
    NotFound,
    /// Non-success status other than 404
    ServerError,
    /// Body did not match the expected shape
    Decode,
    Timeout,
}
