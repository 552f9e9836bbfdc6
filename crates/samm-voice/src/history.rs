//! Bounded conversation history used as reply context.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One utterance in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// FIFO window over the most recent turns. Never holds more than `cap` entries; the
/// oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    cap: usize,
    turns: VecDeque<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            turns: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        while self.turns.len() >= self.cap {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Record a user utterance and the assistant's answer to it.
    pub fn push_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.push(ConversationTurn::user(user));
        self.push(ConversationTurn::assistant(assistant));
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// Oldest first.
    pub fn to_vec(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
