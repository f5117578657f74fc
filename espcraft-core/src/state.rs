//! # Conversation state
//!
//! Everything the sequencer knows about one session: the turn log, the two
//! derived flags and the current step.
//!
//! Values are never edited in place. Every update returns a new state that
//! shares nothing mutable with the old one, so a failed model call can simply
//! drop the new value and keep the old.

use crate::step::Step;
use crate::turn::Turn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
    manual_review_requested: bool,
    return_to_collection: bool,
    step: Step,
}

impl ConversationState {
    /// Fresh conversation at `Step::Collect`
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Getters
    // =========================================================================

    /// Turns, oldest first
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn manual_review_requested(&self) -> bool {
        self.manual_review_requested
    }

    pub fn return_to_collection(&self) -> bool {
        self.return_to_collection
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn is_done(&self) -> bool {
        self.step.is_terminal()
    }

    // =========================================================================
    // Copy-on-append updates
    // =========================================================================

    /// New state with `turn` appended
    pub fn with_turn(&self, turn: Turn) -> Self {
        let mut turns = Vec::with_capacity(self.turns.len() + 1);
        turns.extend_from_slice(&self.turns);
        turns.push(turn);
        Self {
            turns,
            ..self.clone_flags()
        }
    }

    /// New state with a user turn appended
    pub fn with_user_turn(&self, text: impl Into<String>) -> Self {
        self.with_turn(Turn::user(text))
    }

    pub fn with_manual_review(self, requested: bool) -> Self {
        Self {
            manual_review_requested: requested,
            ..self
        }
    }

    pub fn with_return_to_collection(self, requested: bool) -> Self {
        Self {
            return_to_collection: requested,
            ..self
        }
    }

    pub fn with_step(self, step: Step) -> Self {
        Self { step, ..self }
    }

    fn clone_flags(&self) -> Self {
        Self {
            turns: Vec::new(),
            manual_review_requested: self.manual_review_requested,
            return_to_collection: self.return_to_collection,
            step: self.step,
        }
    }
}
