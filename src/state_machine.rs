//! Conversation stream state machine
//!
//! The dispatcher is the only writer of conversation state. It applies inbound
//! frames and user actions synchronously and reports what changed as
//! [`Effect`]s; sending commands and fetching history are left to the runtime.

mod dispatcher;
mod effect;
mod pending;
pub mod state;
mod store;
pub mod tracker;

#[cfg(test)]
mod proptests;

pub use dispatcher::{ActionResult, DispatchError, Dispatcher, LoadDecision};
pub use effect::Effect;
pub use pending::PendingBuffer;
pub use state::{
    BlockStatus, ContentBlock, ConversationKey, ConversationState, LoadStatus, Message, Role,
    Transcript, TurnCursor,
};
pub use store::ConversationStore;
pub use tracker::{InvocationStatus, ToolInvocationState, ToolTracker};
