//! Pure state transition function
//!
//! Given the controller state, a read-only view of the thread and an event,
//! decide the next state and the effects the runtime must execute. No I/O
//! happens here; thread mutations are returned as effects.

use super::{ChatState, Effect, Event, PendingRequest};
use crate::thread::{Role, ThreadStore, Turn, TurnId};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ChatState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ChatState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Reasons an event is refused. A refused event changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error("A completion is already in flight")]
    Busy,
    #[error("Turn {0} not found")]
    UnknownTurn(TurnId),
    #[error("Turn {0} is not an assistant turn and cannot be rewritten")]
    NotRewritable(TurnId),
    #[error("Turn {0} has no user turn before it to answer")]
    MissingPrompt(TurnId),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
pub fn transition(
    state: &ChatState,
    thread: &ThreadStore,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Sending
        // ============================================================

        (_, Event::UserMessage { text, .. }) if text.trim().is_empty() => {
            Err(TransitionError::EmptyMessage)
        }

        // Idle + UserMessage -> AwaitingCompletion, context is the whole thread
        (ChatState::Idle, Event::UserMessage { text, turn_id }) => {
            let turn = Turn::with_id(turn_id.clone(), Role::User, text.trim());
            let mut history = thread.history();
            history.push(turn.to_history_entry());

            Ok(TransitionResult::new(ChatState::AwaitingCompletion {
                request: PendingRequest::Reply {
                    user_turn_id: turn_id,
                },
            })
            .with_effect(Effect::append(turn))
            .with_effect(Effect::NotifyThread)
            .with_effect(Effect::NotifyStateChange)
            .with_effect(Effect::request_completion(history)))
        }

        // Dropped, not queued
        (ChatState::AwaitingCompletion { .. }, Event::UserMessage { .. }) => {
            Err(TransitionError::Busy)
        }

        // ============================================================
        // Deleting - allowed in every state, never touches the pending flag
        // ============================================================

        (state, Event::DeleteTurn { turn_id }) => {
            if !thread.contains(&turn_id) {
                return Ok(TransitionResult::new(state.clone()));
            }
            Ok(TransitionResult::new(state.clone())
                .with_effect(Effect::RemoveExchange { turn_id })
                .with_effect(Effect::NotifyThread))
        }

        // ============================================================
        // Rewriting
        // ============================================================

        (ChatState::AwaitingCompletion { .. }, Event::RewriteTurn { .. }) => {
            Err(TransitionError::Busy)
        }

        // Idle + RewriteTurn -> AwaitingCompletion, context stops before the target
        (ChatState::Idle, Event::RewriteTurn { turn_id }) => {
            let index = thread
                .find_index(&turn_id)
                .ok_or_else(|| TransitionError::UnknownTurn(turn_id.clone()))?;

            match thread.turns()[index].role {
                Role::Assistant => {}
                Role::User => return Err(TransitionError::NotRewritable(turn_id)),
            }
            if thread.prev_user_before(index).is_none() {
                return Err(TransitionError::MissingPrompt(turn_id));
            }

            let history = thread
                .prefix_before(&turn_id)
                .ok_or_else(|| TransitionError::UnknownTurn(turn_id.clone()))?;

            Ok(TransitionResult::new(ChatState::AwaitingCompletion {
                request: PendingRequest::Rewrite {
                    assistant_turn_id: turn_id,
                },
            })
            .with_effect(Effect::NotifyStateChange)
            .with_effect(Effect::request_completion(history)))
        }

        // ============================================================
        // Completion results
        // ============================================================

        // Origin deleted while in flight -> drop the result
        (ChatState::AwaitingCompletion { request }, Event::CompletionSucceeded { .. })
            if !thread.contains(request.origin()) =>
        {
            Ok(TransitionResult::new(ChatState::Idle)
                .with_effect(Effect::DiscardCompletion {
                    request: request.clone(),
                })
                .with_effect(Effect::NotifyStateChange))
        }

        (ChatState::AwaitingCompletion { request }, Event::CompletionSucceeded { content, turn_id }) => {
            let effect = match request {
                // The user turn is still the tail: nothing else can be appended while pending
                PendingRequest::Reply { .. } => {
                    Effect::append(Turn::with_id(turn_id, Role::Assistant, content))
                }
                PendingRequest::Rewrite { assistant_turn_id } => Effect::RegenerateTurn {
                    turn_id: assistant_turn_id.clone(),
                    content,
                },
            };

            Ok(TransitionResult::new(ChatState::Idle)
                .with_effect(effect)
                .with_effect(Effect::NotifyThread)
                .with_effect(Effect::NotifyStateChange))
        }

        // Failure leaves the thread as it was: unanswered user turn or old content
        (ChatState::AwaitingCompletion { .. }, Event::CompletionFailed { message, kind }) => {
            Ok(TransitionResult::new(ChatState::Idle)
                .with_effect(Effect::NotifyError { message, kind })
                .with_effect(Effect::NotifyStateChange))
        }

        (
            ChatState::Idle,
            event @ (Event::CompletionSucceeded { .. } | Event::CompletionFailed { .. }),
        ) => Err(TransitionError::InvalidTransition(format!(
            "No completion outstanding for {}",
            event.name()
        ))),
    }
}
