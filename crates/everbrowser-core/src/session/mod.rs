//! Per-conversation state: history, exclusive access, cancellation.

mod conversation;
mod store;

pub use conversation::Conversation;
pub use store::{SessionGuard, SessionStore};
