//! Mock implementations for testing
//!
//! These mocks enable session tests without a real server.

use super::traits::*;
use super::{ChatSession, SessionHandle};
use crate::error::{LoadError, TransportError};
use crate::protocol::{ConnectionStatus, LoadedConversation};
use crate::state_machine::Effect;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};

// ============================================================================
// Mock Connection
// ============================================================================

/// Connection that records every frame sent
#[derive(Default)]
pub struct MockConnection {
    sent: Mutex<Vec<String>>,
    fail_sends: Mutex<bool>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail as if the socket dropped
    pub fn fail_sends(&self) {
        *self.fail_sends.lock().unwrap() = true;
    }

    pub fn resume_sends(&self) {
        *self.fail_sends.lock().unwrap() = false;
    }

    /// Sent frames, parsed back into JSON
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if *self.fail_sends.lock().unwrap() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }
}

// ============================================================================
// Mock Loader
// ============================================================================

/// Loader serving canned conversations
#[derive(Default)]
pub struct MockLoader {
    conversations: Mutex<HashMap<String, LoadedConversation>>,
    /// When set, loads wait until notified
    gate: Option<Arc<Notify>>,
    /// Notified when a load starts (for test synchronization)
    pub load_started: Arc<Notify>,
    pub requests: Mutex<Vec<String>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversation(self, conversation: LoadedConversation) -> Self {
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id.clone(), conversation);
        self
    }

    /// Hold every load until the returned `Notify` is signalled
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn recorded_requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationLoader for MockLoader {
    async fn load(&self, conversation_id: &str) -> Result<LoadedConversation, LoadError> {
        self.requests
            .lock()
            .unwrap()
            .push(conversation_id.to_string());
        self.load_started.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        self.conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| LoadError::not_found(format!("Conversation {conversation_id} not found")))
    }
}

// ============================================================================
// Test Session
// ============================================================================

/// Running session wired to mocks
pub struct TestSession {
    pub handle: SessionHandle,
    pub connection: Arc<MockConnection>,
    pub loader: Arc<MockLoader>,
    pub effects: broadcast::Receiver<Effect>,
    frames: mpsc::Sender<String>,
    status: watch::Sender<ConnectionStatus>,
}

impl TestSession {
    pub fn start() -> Self {
        Self::with_loader(MockLoader::new())
    }

    pub fn with_loader(loader: MockLoader) -> Self {
        Self::build(loader, Duration::from_secs(5))
    }

    pub fn build(loader: MockLoader, load_timeout: Duration) -> Self {
        let connection = Arc::new(MockConnection::new());
        let loader = Arc::new(loader);
        let (frames_tx, frames_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);

        let (session, handle) = ChatSession::new(
            Arc::clone(&connection),
            Arc::clone(&loader),
            ConnectionChannels {
                frames: frames_rx,
                status: status_rx,
            },
            load_timeout,
        );
        let effects = handle.subscribe();
        tokio::spawn(session.run());

        Self {
            handle,
            connection,
            loader,
            effects,
            frames: frames_tx,
            status: status_tx,
        }
    }

    pub async fn frame(&self, raw: impl Into<String>) {
        self.frames.send(raw.into()).await.unwrap();
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.send(status).unwrap();
    }

    /// Wait for the first effect matching `predicate`
    pub async fn wait_for(&mut self, predicate: impl Fn(&Effect) -> bool) -> Option<Effect> {
        let deadline = tokio::time::sleep(Duration::from_secs(2));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => return None,
                effect = self.effects.recv() => match effect {
                    Ok(effect) if predicate(&effect) => return Some(effect),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LoadedMessage;
    use crate::runtime::SessionError;
    use crate::state_machine::{
        ContentBlock, ConversationKey, DispatchError, InvocationStatus, LoadStatus, Role,
    };
    use serde_json::json;

    fn history(id: &str) -> LoadedConversation {
        LoadedConversation {
            id: id.to_string(),
            title: Some("Renewals".to_string()),
            messages: vec![
                LoadedMessage {
                    id: "m1".to_string(),
                    role: Role::User,
                    content_blocks: vec![ContentBlock::text("which renewals are at risk?")],
                    created_at: chrono::Utc::now(),
                },
                LoadedMessage {
                    id: "m2".to_string(),
                    role: Role::Assistant,
                    content_blocks: vec![ContentBlock::text("Two: Acme and Globex.")],
                    created_at: chrono::Utc::now(),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_mock_loader() {
        let loader = MockLoader::new().with_conversation(history("c1"));

        let loaded = loader.load("c1").await.unwrap();
        assert_eq!(loaded.messages.len(), 2);

        let err = loader.load("c2").await.unwrap_err();
        assert_eq!(err.kind, crate::error::LoadErrorKind::NotFound);
        assert_eq!(loader.recorded_requests(), vec!["c1", "c2"]);
    }

    /// Integration test: new conversation round trip
    #[tokio::test]
    async fn test_send_message_and_stream_reply() {
        let mut rt = TestSession::start();
        rt.handle
            .send_message(ConversationKey::Pending, "Which deals closed this week?")
            .await
            .unwrap();

        let sent = rt.connection.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "send_message");
        assert_eq!(sent[0]["message"], "Which deals closed this week?");
        assert!(sent[0]["conversation_id"].is_null());

        rt.frame(json!({"type": "conversation_created", "conversation_id": "c1"}).to_string())
            .await;
        rt.frame("Three deals ").await;
        rt.frame("closed.").await;
        rt.frame(json!({"type": "message_complete"}).to_string()).await;

        assert!(rt
            .wait_for(|e| matches!(e, Effect::MessageFinished { .. }))
            .await
            .is_some());

        let store = rt.handle.snapshot().await.unwrap();
        let conversation = store.conversation("c1").unwrap();
        assert_eq!(conversation.title, "Which deals closed this week?");
        assert_eq!(conversation.transcript.messages[1].text(), "Three deals closed.");
        assert!(!conversation.transcript.is_thinking);
    }

    #[tokio::test]
    async fn test_actions_rejected_while_disconnected() {
        let mut rt = TestSession::start();
        rt.set_status(ConnectionStatus::Disconnected);
        rt.wait_for(|e| *e == Effect::ConnectionChanged(ConnectionStatus::Disconnected))
            .await
            .unwrap();

        let result = rt.handle.send_message(ConversationKey::Pending, "hello").await;
        assert!(matches!(
            result,
            Err(SessionError::Dispatch(DispatchError::Disconnected(_)))
        ));
        assert!(rt.connection.sent().is_empty());

        let store = rt.handle.snapshot().await.unwrap();
        assert!(store.pending().is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_discards_pending_turn() {
        let rt = TestSession::start();
        rt.connection.fail_sends();

        let result = rt.handle.send_message(ConversationKey::Pending, "hello").await;
        assert!(matches!(result, Err(SessionError::Transport(_))));

        let store = rt.handle.snapshot().await.unwrap();
        assert!(store.pending().is_empty());
        assert!(store.thinking().is_empty());
    }

    #[tokio::test]
    async fn test_approval_round_trip() {
        let mut rt = TestSession::start();
        rt.handle
            .send_message(ConversationKey::Pending, "log a call with Acme")
            .await
            .unwrap();
        rt.frame(json!({"type": "conversation_created", "conversation_id": "c1"}).to_string())
            .await;
        rt.frame(
            json!({"type": "tool_call", "tool_id": "t1", "tool_name": "create_activity", "input": {"account": "Acme"}})
                .to_string(),
        )
        .await;
        rt.frame(
            json!({"type": "tool_result", "tool_id": "t1", "result": {"status": "pending_approval", "operation_id": "op1"}})
                .to_string(),
        )
        .await;
        rt.wait_for(|e| matches!(e, Effect::ApprovalRequested { .. }))
            .await
            .unwrap();

        rt.handle.approve("op1", Some(json!({"notify": true}))).await.unwrap();
        let sent = rt.connection.sent();
        let approval = sent.last().unwrap();
        assert_eq!(approval["type"], "tool_approval");
        assert_eq!(approval["operation_id"], "op1");
        assert_eq!(approval["approved"], true);
        assert_eq!(approval["conversation_id"], "c1");

        // Second decision is refused locally
        let again = rt.handle.reject("op1").await;
        assert!(matches!(
            again,
            Err(SessionError::Dispatch(DispatchError::ApprovalNotPending(_)))
        ));

        rt.frame(
            json!({"type": "tool_approval_result", "operation_id": "op1", "status": "completed"})
                .to_string(),
        )
        .await;
        rt.wait_for(|e| matches!(e, Effect::ApprovalUpdated { is_processing: false, .. }))
            .await
            .unwrap();

        let store = rt.handle.snapshot().await.unwrap();
        let approval = store.tracker().approval("op1").unwrap();
        assert!(approval.status.is_terminal());
        assert!(!approval.is_processing);
    }

    #[tokio::test]
    async fn test_undelivered_approval_can_be_retried() {
        let mut rt = TestSession::start();
        rt.handle
            .send_message(ConversationKey::Pending, "close the Acme deal")
            .await
            .unwrap();
        rt.frame(json!({"type": "conversation_created", "conversation_id": "c1"}).to_string())
            .await;
        rt.frame(
            json!({"type": "tool_call", "tool_id": "t1", "tool_name": "update_deal"}).to_string(),
        )
        .await;
        rt.frame(
            json!({"type": "tool_result", "tool_id": "t1", "result": {"status": "pending_approval", "operation_id": "op1"}})
                .to_string(),
        )
        .await;
        rt.wait_for(|e| matches!(e, Effect::ApprovalRequested { .. }))
            .await
            .unwrap();
        let sent_before = rt.connection.sent().len();

        rt.connection.fail_sends();
        let first = rt.handle.approve("op1", None).await;
        assert!(matches!(first, Err(SessionError::Transport(_))));
        rt.wait_for(|e| matches!(e, Effect::ApprovalUpdated { is_processing: false, .. }))
            .await
            .unwrap();

        let store = rt.handle.snapshot().await.unwrap();
        let approval = store.tracker().approval("op1").unwrap();
        assert_eq!(approval.status, InvocationStatus::PendingApproval);
        assert!(!approval.is_processing);

        rt.connection.resume_sends();
        rt.handle.approve("op1", None).await.unwrap();
        let sent = rt.connection.sent();
        assert_eq!(sent.len(), sent_before + 1);
        assert_eq!(sent.last().unwrap()["type"], "tool_approval");

        let store = rt.handle.snapshot().await.unwrap();
        assert!(store.tracker().approval("op1").unwrap().is_processing);
    }

    #[tokio::test]
    async fn test_cancel_sends_task_id() {
        let mut rt = TestSession::start();
        rt.handle
            .send_message(ConversationKey::Pending, "summarize my pipeline")
            .await
            .unwrap();
        rt.frame(json!({"type": "conversation_created", "conversation_id": "c1"}).to_string())
            .await;
        rt.frame(json!({"type": "task_started", "task_id": "task-9"}).to_string())
            .await;
        let c1 = ConversationKey::id("c1");
        rt.wait_for(|e| matches!(e, Effect::TranscriptChanged { conversation } if *conversation == c1))
            .await
            .unwrap();

        rt.handle.cancel(ConversationKey::id("c1")).await.unwrap();
        let sent = rt.connection.sent();
        assert_eq!(sent.last().unwrap(), &json!({"type": "cancel", "task_id": "task-9"}));

        let store = rt.handle.snapshot().await.unwrap();
        assert!(!store.conversation("c1").unwrap().transcript.is_thinking);
    }

    #[tokio::test]
    async fn test_select_loads_history() {
        let mut rt = TestSession::with_loader(MockLoader::new().with_conversation(history("c7")));
        rt.handle.select("c7").await.unwrap();

        let loaded = rt
            .wait_for(|e| {
                matches!(
                    e,
                    Effect::ConversationLoaded {
                        status: LoadStatus::Loaded,
                        ..
                    }
                )
            })
            .await;
        assert!(loaded.is_some());

        let store = rt.handle.snapshot().await.unwrap();
        let conversation = store.conversation("c7").unwrap();
        assert_eq!(conversation.title, "Renewals");
        assert_eq!(conversation.transcript.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_select_missing_conversation_fails() {
        let mut rt = TestSession::start();
        rt.handle.select("nope").await.unwrap();

        let failed = rt
            .wait_for(|e| {
                matches!(
                    e,
                    Effect::ConversationLoaded {
                        status: LoadStatus::Failed { .. },
                        ..
                    }
                )
            })
            .await;
        assert!(failed.is_some());
    }

    #[tokio::test]
    async fn test_frames_processed_while_load_in_flight() {
        let (loader, gate) = MockLoader::new().with_conversation(history("c7")).gated();
        let mut rt = TestSession::with_loader(loader);
        let load_started = Arc::clone(&rt.loader.load_started);

        rt.handle.select("c7").await.unwrap();
        load_started.notified().await;

        // Live frames for the conversation arrive while the fetch is blocked
        rt.frame(
            json!({"type": "task_started", "task_id": "bg", "conversation_id": "c7"}).to_string(),
        )
        .await;
        rt.wait_for(|e| matches!(e, Effect::TranscriptChanged { .. }))
            .await
            .unwrap();

        gate.notify_one();
        rt.wait_for(|e| matches!(e, Effect::ConversationLoaded { status: LoadStatus::NotLoaded, .. }))
            .await
            .unwrap();

        let store = rt.handle.snapshot().await.unwrap();
        let conversation = store.conversation("c7").unwrap();
        assert!(conversation.transcript.messages.is_empty());
        assert_eq!(conversation.transcript.active_task_id.as_deref(), Some("bg"));
    }

    #[tokio::test]
    async fn test_load_timeout() {
        let (loader, _gate) = MockLoader::new().gated();
        let mut rt = TestSession::build(loader, Duration::from_millis(50));
        rt.handle.select("slow").await.unwrap();

        let effect = rt
            .wait_for(|e| matches!(e, Effect::ConversationLoaded { status: LoadStatus::Failed { .. }, .. }))
            .await;
        assert!(effect.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_stops_session() {
        let rt = TestSession::start();
        rt.handle.shutdown();

        // The session drops its receiver once the loop exits
        let mut result = Ok(());
        for _ in 0..50 {
            result = rt.handle.send_message(ConversationKey::Pending, "hi").await;
            if result.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(result, Err(SessionError::Closed)));
    }
}
