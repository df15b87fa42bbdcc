//! Effects produced by state transitions

use super::state::PendingRequest;
use crate::gateway::GatewayErrorKind;
use crate::thread::{HistoryEntry, Turn, TurnId};

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Add a turn at the end of the thread
    AppendTurn { turn: Turn },

    /// Cascading delete of a turn and its pair
    RemoveExchange { turn_id: TurnId },

    /// Replace an assistant turn's content in place
    RegenerateTurn { turn_id: TurnId, content: String },

    /// Ask the gateway for a reply to `history` (spawns as background task)
    RequestCompletion { history: Vec<HistoryEntry> },

    /// A completion arrived for a turn that no longer exists
    DiscardCompletion { request: PendingRequest },

    /// Publish the current turn list to clients
    NotifyThread,

    /// Publish the pending flag to clients
    NotifyStateChange,

    /// Surface a gateway failure to clients
    NotifyError {
        message: String,
        kind: GatewayErrorKind,
    },
}

impl Effect {
    pub fn append(turn: Turn) -> Self {
        Effect::AppendTurn { turn }
    }

    pub fn request_completion(history: Vec<HistoryEntry>) -> Self {
        Effect::RequestCompletion { history }
    }
}
