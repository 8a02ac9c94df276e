//! Parley - terminal client for an assistant chat service
//!
//! Streams replies over a per-user WebSocket connection and keeps a local
//! transcript per conversation, including tool calls awaiting approval.

mod cli;
mod config;
mod error;
mod loader;
mod protocol;
mod runtime;
mod state_machine;
mod title_generator;
mod transport;

use cli::{render_conversation, render_effect, Command, HELP};
use config::ClientConfig;
use loader::HttpConversationLoader;
use runtime::{ChatSession, SessionHandle};
use state_machine::{ConversationKey, Effect, LoadStatus};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::WsConnection;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout is the transcript
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    tracing::info!(
        ws_url = %config.connection_url(),
        api_url = %config.api_url,
        "Starting parley"
    );

    let shutdown = CancellationToken::new();
    let (connection, channels) = WsConnection::spawn(config.connection_url(), shutdown.clone());
    let loader = HttpConversationLoader::new(&config.api_url, config.load_timeout)?;
    let (session, handle) = ChatSession::new(connection, loader, channels, config.load_timeout);
    let mut effects = handle.subscribe();
    let session_task = tokio::spawn(session.run());

    println!("{HELP}");
    let mut current = ConversationKey::Pending;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(command) = Command::parse(&line) else { continue };
                if command == Command::Quit {
                    break;
                }
                run_command(&handle, &mut current, command).await;
            }

            effect = effects.recv() => match effect {
                Ok(effect) => show_effect(&handle, &mut current, &effect).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Display fell behind, some updates were skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown();
    shutdown.cancel();
    let _ = session_task.await;
    Ok(())
}

async fn run_command(handle: &SessionHandle, current: &mut ConversationKey, command: Command) {
    let result = match command {
        Command::Send(text) => handle.send_message(current.clone(), text).await,
        Command::New => {
            *current = ConversationKey::Pending;
            println!("[new conversation]");
            Ok(())
        }
        Command::Open(id) => {
            *current = ConversationKey::id(id.as_str());
            let result = handle.select(id.as_str()).await;
            // Live conversations are not refetched; show what we have
            if let Ok(store) = handle.snapshot().await {
                if let Some(conversation) = store.conversation(&id) {
                    if conversation.load_status != LoadStatus::Loading {
                        print!("{}", render_conversation(conversation));
                    }
                }
            }
            result
        }
        Command::Cancel => handle.cancel(current.clone()).await,
        Command::Approve(operation_id) => handle.approve(operation_id, None).await,
        Command::Deny(operation_id) => handle.reject(operation_id).await,
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Invalid(message) => {
            println!("{message}. {HELP}");
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    if let Err(e) = result {
        println!("[{e}]");
    }
}

async fn show_effect(handle: &SessionHandle, current: &mut ConversationKey, effect: &Effect) {
    if let Effect::ConversationCreated {
        conversation_id, ..
    } = effect
    {
        if *current == ConversationKey::Pending {
            *current = ConversationKey::id(conversation_id.as_str());
        }
    }

    if let Some(text) = render_effect(effect, current) {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    if let Effect::ConversationLoaded {
        conversation_id,
        status: LoadStatus::Loaded,
    } = effect
    {
        if current.durable_id() == Some(conversation_id.as_str()) {
            if let Ok(store) = handle.snapshot().await {
                if let Some(conversation) = store.conversation(conversation_id) {
                    print!("{}", render_conversation(conversation));
                }
            }
        }
    }
}
