//! Session store: session id → bounded conversation history, with explicit lifecycle.
//!
//! The conversation loop owns one session per run; a telephony front end would own one
//! per call. Entries are created explicitly, touched on every exchange, and removed either
//! when the session ends or when they have been idle too long.

use crate::history::{ConversationHistory, ConversationTurn};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub history: ConversationHistory,
    pub created_at: DateTime<Utc>,
    /// Monotonic; idle eviction never looks at wall-clock time.
    pub last_active: Instant,
}

/// Concurrent map of live sessions.
pub struct SessionStore {
    history_cap: usize,
    sessions: DashMap<SessionId, SessionEntry>,
}

impl SessionStore {
    pub fn new(history_cap: usize) -> Self {
        Self {
            history_cap,
            sessions: DashMap::new(),
        }
    }

    /// Open a new session with an empty history.
    pub fn create(&self) -> SessionId {
        let id = SessionId::new();
        self.sessions.insert(
            id,
            SessionEntry {
                history: ConversationHistory::new(self.history_cap),
                created_at: Utc::now(),
                last_active: Instant::now(),
            },
        );
        info!(session = %id, "📂 Session created");
        id
    }

    /// Snapshot of the session's history, oldest first. `None` for unknown sessions.
    pub fn history(&self, id: SessionId) -> Option<Vec<ConversationTurn>> {
        self.sessions.get(&id).map(|e| e.history.to_vec())
    }

    /// Append one turn. Returns false if the session does not exist.
    pub fn record(&self, id: SessionId, turn: ConversationTurn) -> bool {
        match self.sessions.get_mut(&id) {
            Some(mut entry) => {
                entry.history.push(turn);
                entry.last_active = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Append a user utterance and the reply to it.
    pub fn record_exchange(&self, id: SessionId, user: &str, assistant: &str) -> bool {
        match self.sessions.get_mut(&id) {
            Some(mut entry) => {
                entry.history.push_exchange(user, assistant);
                entry.last_active = Instant::now();
                debug!(session = %id, len = entry.history.len(), "History updated");
                true
            }
            None => false,
        }
    }

    /// Remove the session, returning its final state.
    pub fn end(&self, id: SessionId) -> Option<SessionEntry> {
        let removed = self.sessions.remove(&id).map(|(_, e)| e);
        if removed.is_some() {
            info!(session = %id, "📁 Session ended");
        }
        removed
    }

    /// Drop sessions idle for longer than `max_idle`. Returns how many were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.evict_idle_at(Instant::now(), max_idle)
    }

    /// [`SessionStore::evict_idle`] against an explicit `now`.
    pub fn evict_idle_at(&self, now: Instant, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, e| now.saturating_duration_since(e.last_active) <= max_idle);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!(evicted, "🧹 Evicted idle sessions");
        }
        evicted
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
