//! Per-user conversation sessions.
//!
//! Each session keeps a bounded, ordered history and expires after an idle
//! timeout. Expired sessions are swept lazily on every write, under the same
//! lock as the write itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message from the remote user
    User,
    /// Reply produced by the relay
    Assistant,
}

impl Role {
    /// Role name as used by chat-completion APIs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct Turn {
    role: Role,
    text: String,
    created_at: DateTime<Utc>,
}

/// A turn as handed to the responder (no timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    /// Author
    pub role: Role,
    /// Message text
    pub text: String,
}

impl ContextTurn {
    /// Build a context turn.
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

#[derive(Debug)]
struct Session {
    turns: VecDeque<Turn>,
    last_activity: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    seen: HashSet<String>,
}

impl Inner {
    fn sweep(&mut self, now: Instant, timeout: Duration) {
        self.sessions.retain(|user_id, session| {
            let alive = now.saturating_duration_since(session.last_activity) <= timeout;
            if !alive {
                let last_turn_at = session.turns.back().map(|t| t.created_at);
                info!(user_id = %user_id, ?last_turn_at, "Expired session");
            }
            alive
        });
    }
}

/// Owner of all live sessions.
#[derive(Debug)]
pub struct SessionStore {
    inner: RwLock<Inner>,
    max_turns: usize,
    timeout: Duration,
}

impl SessionStore {
    /// Create a store keeping at most `max_turns` per user (minimum 1) and
    /// expiring sessions idle for longer than `timeout`.
    #[must_use]
    pub fn new(max_turns: usize, timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_turns: max_turns.max(1),
            timeout,
        }
    }

    /// Append a turn for `user_id`, creating the session if needed.
    pub async fn record_turn(&self, user_id: &str, role: Role, text: impl Into<String>) {
        let mut inner = self.inner.write().await;
        self.append(&mut inner, user_id, role, text.into());
    }

    /// Append a turn and return up to `limit` turns that preceded it, oldest
    /// first, in one critical section.
    pub async fn record_turn_with_context(
        &self,
        user_id: &str,
        role: Role,
        text: impl Into<String>,
        limit: usize,
    ) -> Vec<ContextTurn> {
        let mut inner = self.inner.write().await;
        let session = self.append(&mut inner, user_id, role, text.into());

        let prior = session.turns.len().saturating_sub(1);
        session
            .turns
            .iter()
            .take(prior)
            .skip(prior.saturating_sub(limit))
            .map(|t| ContextTurn::new(t.role, t.text.clone()))
            .collect()
    }

    fn append<'a>(
        &self,
        inner: &'a mut Inner,
        user_id: &str,
        role: Role,
        text: String,
    ) -> &'a Session {
        let now = Instant::now();
        inner.sweep(now, self.timeout);

        if !inner.seen.contains(user_id) {
            inner.seen.insert(user_id.to_string());
        }

        let session = inner
            .sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Session {
                turns: VecDeque::with_capacity(self.max_turns),
                last_activity: now,
            });

        session.turns.push_back(Turn {
            role,
            text,
            created_at: Utc::now(),
        });
        session.last_activity = session.last_activity.max(now);
        while session.turns.len() > self.max_turns {
            session.turns.pop_front();
        }

        debug!(user_id = %user_id, role = %role, turns = session.turns.len(), "Recorded turn");
        session
    }

    /// Last `limit` turns for `user_id`, oldest first.
    pub async fn get_context(&self, user_id: &str, limit: usize) -> Vec<ContextTurn> {
        let inner = self.inner.read().await;
        let Some(session) = inner.sessions.get(user_id) else {
            return Vec::new();
        };

        let skip = session.turns.len().saturating_sub(limit);
        session
            .turns
            .iter()
            .skip(skip)
            .map(|t| ContextTurn::new(t.role, t.text.clone()))
            .collect()
    }

    /// Number of turns currently stored for `user_id`.
    pub async fn history_len(&self, user_id: &str) -> usize {
        let inner = self.inner.read().await;
        inner.sessions.get(user_id).map_or(0, |s| s.turns.len())
    }

    /// Drop the session for `user_id`. Idempotent.
    pub async fn clear(&self, user_id: &str) {
        let mut inner = self.inner.write().await;
        if inner.sessions.remove(user_id).is_some() {
            info!(user_id = %user_id, "Cleared session");
        }
    }

    /// Sweep expired sessions and return how many remain.
    pub async fn active_count(&self) -> usize {
        let mut inner = self.inner.write().await;
        inner.sweep(Instant::now(), self.timeout);
        inner.sessions.len()
    }

    /// Distinct users seen since startup; not reduced by expiry.
    pub async fn total_ever(&self) -> usize {
        self.inner.read().await.seen.len()
    }
}
