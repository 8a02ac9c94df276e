//! Runtime for a chat session
//!
//! The session task owns the dispatcher and is the only place conversation
//! state changes. Everything else talks to it through a [`SessionHandle`].

mod session;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use session::{ChatSession, SessionHandle, UserAction};
pub use traits::*;

use crate::error::TransportError;
use crate::state_machine::DispatchError;
use thiserror::Error;

/// Errors reported to callers of [`SessionHandle`]
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("Failed to send command: {0}")]
    Transport(#[from] TransportError),
    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Session has shut down")]
    Closed,
}
