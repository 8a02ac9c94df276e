//! Chat session event loop
//!
//! One task owns the dispatcher and serializes inbound frames, connectivity
//! changes, user actions and finished loads through it.

use super::traits::{Connection, ConnectionChannels, ConversationLoader};
use super::SessionError;
use crate::error::LoadError;
use crate::protocol::{ConnectionStatus, LoadedConversation};
use crate::state_machine::{
    ActionResult, ConversationKey, ConversationStore, DispatchError, Dispatcher, Effect, LoadDecision,
    LoadStatus,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

type Reply = oneshot::Sender<Result<(), SessionError>>;
type LoadOutcome = (String, Result<LoadedConversation, LoadError>);

const ACTION_CHANNEL_CAPACITY: usize = 32;
const EFFECT_CHANNEL_CAPACITY: usize = 256;

/// Requests handled by the session task
#[derive(Debug)]
pub enum UserAction {
    SendMessage {
        conversation: ConversationKey,
        text: String,
        reply: Reply,
    },
    Cancel {
        conversation: ConversationKey,
        reply: Reply,
    },
    Approve {
        operation_id: String,
        options: Option<Value>,
        reply: Reply,
    },
    Reject {
        operation_id: String,
        reply: Reply,
    },
    /// Conversation picked from history; fetches it unless it is live
    Select { conversation_id: String },
    Close { conversation: ConversationKey },
    /// Copy of the current store for rendering
    Snapshot {
        reply: oneshot::Sender<ConversationStore>,
    },
}

/// Handle to interact with a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    actions: mpsc::Sender<UserAction>,
    effects: broadcast::Sender<Effect>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    pub async fn send_message(
        &self,
        conversation: ConversationKey,
        text: impl Into<String>,
    ) -> Result<(), SessionError> {
        let text = text.into();
        self.request(|reply| UserAction::SendMessage {
            conversation,
            text,
            reply,
        })
        .await
    }

    pub async fn cancel(&self, conversation: ConversationKey) -> Result<(), SessionError> {
        self.request(|reply| UserAction::Cancel {
            conversation,
            reply,
        })
        .await
    }

    pub async fn approve(
        &self,
        operation_id: impl Into<String>,
        options: Option<Value>,
    ) -> Result<(), SessionError> {
        let operation_id = operation_id.into();
        self.request(|reply| UserAction::Approve {
            operation_id,
            options,
            reply,
        })
        .await
    }

    pub async fn reject(&self, operation_id: impl Into<String>) -> Result<(), SessionError> {
        let operation_id = operation_id.into();
        self.request(|reply| UserAction::Reject {
            operation_id,
            reply,
        })
        .await
    }

    pub async fn select(&self, conversation_id: impl Into<String>) -> Result<(), SessionError> {
        self.post(UserAction::Select {
            conversation_id: conversation_id.into(),
        })
        .await
    }

    pub async fn close(&self, conversation: ConversationKey) -> Result<(), SessionError> {
        self.post(UserAction::Close { conversation }).await
    }

    pub async fn snapshot(&self) -> Result<ConversationStore, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.post(UserAction::Snapshot { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Effect> {
        self.effects.subscribe()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn request(&self, build: impl FnOnce(Reply) -> UserAction) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.post(build(reply)).await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    async fn post(&self, action: UserAction) -> Result<(), SessionError> {
        self.actions
            .send(action)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

/// Session task owning the conversation state
pub struct ChatSession<C, L> {
    dispatcher: Dispatcher,
    connection: C,
    loader: Arc<L>,
    frames: mpsc::Receiver<String>,
    status: watch::Receiver<ConnectionStatus>,
    actions: mpsc::Receiver<UserAction>,
    loads_tx: mpsc::Sender<LoadOutcome>,
    loads_rx: mpsc::Receiver<LoadOutcome>,
    effects: broadcast::Sender<Effect>,
    shutdown: CancellationToken,
    load_timeout: Duration,
}

impl<C, L> ChatSession<C, L>
where
    C: Connection,
    L: ConversationLoader + 'static,
{
    pub fn new(
        connection: C,
        loader: L,
        channels: ConnectionChannels,
        load_timeout: Duration,
    ) -> (Self, SessionHandle) {
        let (actions_tx, actions_rx) = mpsc::channel(ACTION_CHANNEL_CAPACITY);
        let (loads_tx, loads_rx) = mpsc::channel(ACTION_CHANNEL_CAPACITY);
        let (effects, _) = broadcast::channel(EFFECT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        let handle = SessionHandle {
            actions: actions_tx,
            effects: effects.clone(),
            shutdown: shutdown.clone(),
        };
        let session = Self {
            dispatcher: Dispatcher::new(),
            connection,
            loader: Arc::new(loader),
            frames: channels.frames,
            status: channels.status,
            actions: actions_rx,
            loads_tx,
            loads_rx,
            effects,
            shutdown,
            load_timeout,
        };
        (session, handle)
    }

    /// Run until shut down or every handle is dropped
    pub async fn run(mut self) {
        tracing::info!("Starting chat session");

        let initial = *self.status.borrow_and_update();
        let effects = self.dispatcher.set_connection_status(initial);
        self.publish(effects);

        let mut inbound_open = true;
        let mut status_open = true;

        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => {
                    tracing::info!("Chat session shutdown requested");
                    break;
                }

                changed = self.status.changed(), if status_open => {
                    let status = if changed.is_ok() {
                        *self.status.borrow_and_update()
                    } else {
                        status_open = false;
                        ConnectionStatus::Disconnected
                    };
                    let effects = self.dispatcher.set_connection_status(status);
                    self.publish(effects);
                }

                frame = self.frames.recv(), if inbound_open => {
                    if let Some(raw) = frame {
                        let effects = self.dispatcher.on_frame(&raw);
                        self.publish(effects);
                    } else {
                        tracing::info!("Inbound frame stream closed");
                        inbound_open = false;
                    }
                }

                Some((conversation_id, outcome)) = self.loads_rx.recv() => {
                    let effects = self.dispatcher.finish_load(&conversation_id, outcome);
                    self.publish(effects);
                }

                action = self.actions.recv() => {
                    let Some(action) = action else {
                        tracing::info!("All session handles dropped");
                        break;
                    };
                    self.handle_action(action).await;
                }
            }
        }

        tracing::info!("Chat session stopped");
    }

    async fn handle_action(&mut self, action: UserAction) {
        match action {
            UserAction::SendMessage {
                conversation,
                text,
                reply,
            } => {
                let result = match self.dispatcher.send_message(&conversation, &text) {
                    Ok(action) => self.deliver(action).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(SessionError::Transport(e)) = &result {
                    let effects = self.dispatcher.fail_turn(&conversation, e.to_string());
                    self.publish(effects);
                }
                let _ = reply.send(result);
            }
            UserAction::Cancel {
                conversation,
                reply,
            } => {
                let result = self.dispatcher.cancel_task(&conversation);
                let _ = reply.send(self.complete(result).await);
            }
            UserAction::Approve {
                operation_id,
                options,
                reply,
            } => {
                let result = self.dispatcher.approve_tool(&operation_id, options);
                let result = self.complete(result).await;
                self.reopen_on_failure(&operation_id, &result);
                let _ = reply.send(result);
            }
            UserAction::Reject {
                operation_id,
                reply,
            } => {
                let result = self.dispatcher.reject_tool(&operation_id);
                let result = self.complete(result).await;
                self.reopen_on_failure(&operation_id, &result);
                let _ = reply.send(result);
            }
            UserAction::Select { conversation_id } => self.select(conversation_id),
            UserAction::Close { conversation } => {
                let effects = self.dispatcher.close_conversation(&conversation);
                self.publish(effects);
            }
            UserAction::Snapshot { reply } => {
                let _ = reply.send(self.dispatcher.store().clone());
            }
        }
    }

    async fn complete(
        &mut self,
        result: Result<ActionResult, DispatchError>,
    ) -> Result<(), SessionError> {
        self.deliver(result?).await
    }

    /// An undelivered approval decision can be made again
    fn reopen_on_failure(&mut self, operation_id: &str, result: &Result<(), SessionError>) {
        if let Err(SessionError::Transport(e)) = result {
            let effects = self.dispatcher.fail_approval(operation_id, &e.to_string());
            self.publish(effects);
        }
    }

    /// Publish the action's effects, then send its command
    async fn deliver(&mut self, action: ActionResult) -> Result<(), SessionError> {
        let ActionResult { outbound, effects } = action;
        self.publish(effects);

        let Some(command) = outbound else {
            return Ok(());
        };
        let frame = command.to_frame()?;
        tracing::debug!(command = command.kind(), "Sending command");
        self.connection.send(frame).await?;
        Ok(())
    }

    fn select(&mut self, conversation_id: String) {
        if self.dispatcher.begin_load(&conversation_id) == LoadDecision::Skip {
            return;
        }
        self.publish(vec![Effect::ConversationLoaded {
            conversation_id: conversation_id.clone(),
            status: LoadStatus::Loading,
        }]);

        let loader = Arc::clone(&self.loader);
        let loads = self.loads_tx.clone();
        let timeout = self.load_timeout;
        tokio::spawn(async move {
            tracing::debug!(conv_id = %conversation_id, "Loading conversation");
            let outcome = match tokio::time::timeout(timeout, loader.load(&conversation_id)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(LoadError::timeout(format!(
                    "No response after {}s",
                    timeout.as_secs()
                ))),
            };
            let _ = loads.send((conversation_id, outcome)).await;
        });
    }

    fn publish(&self, effects: Vec<Effect>) {
        for effect in effects {
            // No subscribers is fine
            let _ = self.effects.send(effect);
        }
    }
}
