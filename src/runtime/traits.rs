//! Trait abstractions for session I/O
//!
//! These traits enable testing the session with mock implementations.

use crate::error::{LoadError, TransportError};
use crate::protocol::{ConnectionStatus, LoadedConversation};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Outbound half of the persistent connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one text frame
    async fn send(&self, frame: String) -> Result<(), TransportError>;
}

/// Fetches persisted conversations
#[async_trait]
pub trait ConversationLoader: Send + Sync {
    async fn load(&self, conversation_id: &str) -> Result<LoadedConversation, LoadError>;
}

/// Inbound half of the persistent connection
#[derive(Debug)]
pub struct ConnectionChannels {
    /// Raw text frames in arrival order
    pub frames: mpsc::Receiver<String>,
    pub status: watch::Receiver<ConnectionStatus>,
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: Connection + ?Sized> Connection for Arc<T> {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        (**self).send(frame).await
    }
}

#[async_trait]
impl<T: ConversationLoader + ?Sized> ConversationLoader for Arc<T> {
    async fn load(&self, conversation_id: &str) -> Result<LoadedConversation, LoadError> {
        (**self).load(conversation_id).await
    }
}
