//! WebSocket transport for the per-user connection
//!
//! Connects once. Inbound text frames are forwarded in arrival order and
//! connectivity is published on a watch channel; reconnecting is left to the
//! caller.

use crate::error::TransportError;
use crate::protocol::ConnectionStatus;
use crate::runtime::{Connection, ConnectionChannels};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const FRAME_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CHANNEL_CAPACITY: usize = 32;

/// Outbound half of a WebSocket connection
pub struct WsConnection {
    outbound: mpsc::Sender<String>,
    status: watch::Receiver<ConnectionStatus>,
}

impl WsConnection {
    /// Start connecting in the background
    pub fn spawn(url: String, shutdown: CancellationToken) -> (Self, ConnectionChannels) {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        tokio::spawn(run_socket(url, status_tx, frames_tx, outbound_rx, shutdown));

        let connection = Self {
            outbound: outbound_tx,
            status: status_rx.clone(),
        };
        let channels = ConnectionChannels {
            frames: frames_rx,
            status: status_rx,
        };
        (connection, channels)
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if !self.status.borrow().accepts_outbound() {
            return Err(TransportError::NotConnected);
        }
        // Never wait on the socket task; it may itself be waiting on us
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Backlogged,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

async fn run_socket(
    url: String,
    status: watch::Sender<ConnectionStatus>,
    frames: mpsc::Sender<String>,
    mut outbound: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) {
    tracing::info!(url = %url, "Connecting");
    let socket = tokio::select! {
        () = shutdown.cancelled() => return,
        result = connect_async(url.as_str()) => match result {
            Ok((socket, _response)) => socket,
            Err(e) => {
                let error = TransportError::Connect(e.to_string());
                tracing::error!(url = %url, error = %error, "WebSocket connect failed");
                let _ = status.send(ConnectionStatus::Error);
                return;
            }
        },
    };
    tracing::info!(url = %url, "WebSocket connected");
    let _ = status.send(ConnectionStatus::Connected);

    let (mut sink, mut stream) = socket.split();
    let final_status = loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = sink.close().await;
                break ConnectionStatus::Disconnected;
            }

            Some(frame) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::warn!(error = %e, "WebSocket send failed");
                    break ConnectionStatus::Error;
                }
            }

            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if frames.send(text.as_str().to_owned()).await.is_err() {
                        tracing::debug!("Frame receiver dropped, closing socket");
                        let _ = sink.close().await;
                        break ConnectionStatus::Disconnected;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "WebSocket closed by server");
                    break ConnectionStatus::Disconnected;
                }
                // Control and binary frames carry nothing for us
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket read failed");
                    break ConnectionStatus::Error;
                }
                None => break ConnectionStatus::Disconnected,
            },
        }
    };

    let _ = status.send(final_status);
    tracing::info!(status = ?final_status, "WebSocket connection ended");
}
