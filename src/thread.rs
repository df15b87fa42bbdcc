//! Conversation thread model
//!
//! An ordered sequence of user/assistant turns with pairing-aware
//! deletion and in-place regeneration of assistant replies.

mod id;
mod store;
mod turn;


pub use id::TurnId;
pub use store::{StoreError, ThreadStore};
pub use turn::{HistoryEntry, Role, Turn};
