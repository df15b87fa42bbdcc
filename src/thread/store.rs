//! Owned, ordered turn sequence
//!
//! Every operation here is synchronous and runs to completion. Callers keep
//! the pairing invariant when appending: an assistant turn is only appended
//! directly after the user turn it answers.

use super::{HistoryEntry, Role, Turn, TurnId};
use thiserror::Error;

/// Errors from thread mutations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Turn {0} not found")]
    UnknownTurn(TurnId),
    #[error("Turn {0} is not an assistant turn")]
    NotAssistant(TurnId),
    #[error("Turn {0} already exists")]
    DuplicateId(TurnId),
}

/// The turns of one conversation, in order
#[derive(Debug, Clone, Default)]
pub struct ThreadStore {
    turns: Vec<Turn>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All turns in order
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Insert a turn at the end of the thread
    pub fn append(&mut self, turn: Turn) -> Result<TurnId, StoreError> {
        if self.contains(&turn.id) {
            return Err(StoreError::DuplicateId(turn.id));
        }
        let id = turn.id.clone();
        self.turns.push(turn);
        Ok(id)
    }

    pub fn find_index(&self, id: &TurnId) -> Option<usize> {
        self.turns.iter().position(|turn| &turn.id == id)
    }

    pub fn contains(&self, id: &TurnId) -> bool {
        self.find_index(id).is_some()
    }

    /// Remove a turn together with the turn it is paired with.
    ///
    /// A user turn takes its reply with it, an assistant turn takes the user
    /// turn that prompted it. Everything between the pair goes too. Unknown
    /// ids are a no-op. Returns the removed turns.
    pub fn cascading_delete(&mut self, id: &TurnId) -> Vec<Turn> {
        let Some(index) = self.find_index(id) else {
            return Vec::new();
        };

        let range = match self.turns[index].role {
            Role::User => match self.next_assistant_after(index) {
                Some(reply) => index..=reply,
                None => index..=index,
            },
            Role::Assistant => match self.prev_user_before(index) {
                Some(prompt) => prompt..=index,
                None => index..=index,
            },
        };

        self.turns.drain(range).collect()
    }

    /// Replace an assistant turn's content, keeping its id and position
    pub fn regenerate(&mut self, id: &TurnId, content: impl Into<String>) -> Result<(), StoreError> {
        let turn = self
            .turns
            .iter_mut()
            .find(|turn| &turn.id == id)
            .ok_or_else(|| StoreError::UnknownTurn(id.clone()))?;

        match turn.role {
            Role::Assistant => {
                turn.content = content.into();
                Ok(())
            }
            Role::User => Err(StoreError::NotAssistant(id.clone())),
        }
    }

    /// Role/content pairs of every turn strictly before `id`
    pub fn prefix_before(&self, id: &TurnId) -> Option<Vec<HistoryEntry>> {
        let index = self.find_index(id)?;
        Some(
            self.turns[..index]
                .iter()
                .map(Turn::to_history_entry)
                .collect(),
        )
    }

    /// Role/content pairs of the whole thread
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.turns.iter().map(Turn::to_history_entry).collect()
    }

    /// Index of the reply to the user turn at `index`, if it was answered.
    /// The scan stops at the next user turn.
    pub fn next_assistant_after(&self, index: usize) -> Option<usize> {
        let offset = self.turns[index + 1..]
            .iter()
            .position(|turn| turn.role == Role::Assistant)?;
        let reply = index + 1 + offset;

        self.turns[index + 1..reply]
            .iter()
            .all(|turn| turn.role != Role::User)
            .then_some(reply)
    }

    /// Index of the nearest user turn before `index`
    pub fn prev_user_before(&self, index: usize) -> Option<usize> {
        self.turns[..index]
            .iter()
            .rposition(|turn| turn.role == Role::User)
    }
}
