//! Conversation controller state

use crate::thread::TurnId;
use serde::{Deserialize, Serialize};

/// The single in-flight completion, if any
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatState {
    /// Ready for user input, no completion outstanding
    #[default]
    Idle,

    /// A completion request is in flight
    AwaitingCompletion { request: PendingRequest },
}

impl ChatState {
    /// Whether a completion is outstanding
    pub fn is_pending(&self) -> bool {
        matches!(self, ChatState::AwaitingCompletion { .. })
    }
}

/// What an outstanding completion will be applied to.
///
/// The turn id is captured when the request starts so a reply whose origin
/// was deleted in the meantime can be recognised and dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingRequest {
    /// Answer to a freshly sent user turn
    Reply { user_turn_id: TurnId },
    /// New content for an existing assistant turn
    Rewrite { assistant_turn_id: TurnId },
}

impl PendingRequest {
    /// The turn whose survival decides whether the result is applied
    pub fn origin(&self) -> &TurnId {
        match self {
            PendingRequest::Reply { user_turn_id } => user_turn_id,
            PendingRequest::Rewrite { assistant_turn_id } => assistant_turn_id,
        }
    }
}
