//! Events that can occur in a conversation

use crate::gateway::GatewayErrorKind;
use crate::thread::TurnId;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
        /// Id the new user turn will carry
        turn_id: TurnId,
    },
    DeleteTurn {
        turn_id: TurnId,
    },
    RewriteTurn {
        turn_id: TurnId,
    },

    // Gateway events
    CompletionSucceeded {
        content: String,
        /// Id for the assistant turn, should the reply be appended
        turn_id: TurnId,
    },
    CompletionFailed {
        message: String,
        kind: GatewayErrorKind,
    },
}

impl Event {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Event::UserMessage { .. } => "user_message",
            Event::DeleteTurn { .. } => "delete_turn",
            Event::RewriteTurn { .. } => "rewrite_turn",
            Event::CompletionSucceeded { .. } => "completion_succeeded",
            Event::CompletionFailed { .. } => "completion_failed",
        }
    }
}
