//! Per-role record of which chat messages the viewer has seen
//!
//! A message is unread when somebody else sent it, its id has not been marked,
//! and it is newer than the read horizon. Entries carry the message's own
//! timestamp. Pruning and the entry cap drop the oldest messages and move the
//! horizon past them, so a dropped id still reads as seen.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::identity::{Identity, UserId};
use crate::message::{Message, MessageId};
use crate::store::{load_json, save_json, KeyValueStore, StoreError};

/// Storage key prefix; the role name is appended
pub const READ_STATE_KEY_PREFIX: &str = "motus.read_state.";

/// How long entries are kept and how many at most
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub retention: Duration,
    pub max_entries: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention: Duration::days(90),
            max_entries: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReadEntry {
    id: MessageId,
    sent_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedReadState {
    /// Messages sent before this instant count as read
    horizon: Option<DateTime<Utc>>,
    entries: Vec<ReadEntry>,
}

pub struct ReadStateTracker<S: KeyValueStore> {
    store: S,
    key: String,
    viewer: UserId,
    policy: RetentionPolicy,
    horizon: Option<DateTime<Utc>>,
    seen: BTreeMap<MessageId, DateTime<Utc>>,
}

impl<S: KeyValueStore> ReadStateTracker<S> {
    /// Load the persisted set for `identity.role`. Unreadable data starts a fresh set.
    pub fn load(store: S, identity: Identity, policy: RetentionPolicy) -> Self {
        let key = format!("{}{}", READ_STATE_KEY_PREFIX, identity.role);
        let state = match load_json::<PersistedReadState>(&store, &key) {
            Ok(Some(state)) => state,
            Ok(None) => PersistedReadState::default(),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable read-state");
                PersistedReadState::default()
            }
        };
        let seen: BTreeMap<_, _> = state.entries.into_iter().map(|e| (e.id, e.sent_at)).collect();
        debug!(key = %key, entries = seen.len(), "Loaded read-state");

        Self {
            store,
            key,
            viewer: identity.user_id,
            policy,
            horizon: state.horizon,
            seen,
        }
    }

    pub fn viewer(&self) -> UserId {
        self.viewer
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn horizon(&self) -> Option<DateTime<Utc>> {
        self.horizon
    }

    pub fn is_marked(&self, id: MessageId) -> bool {
        self.seen.contains_key(&id)
    }

    pub fn is_unread(&self, message: &Message) -> bool {
        message.sender != self.viewer
            && !self.seen.contains_key(&message.id)
            && self.horizon.is_none_or(|h| message.timestamp >= h)
    }

    pub fn unread_count(&self, messages: &[Message]) -> usize {
        messages.iter().filter(|m| self.is_unread(m)).count()
    }

    /// Mark messages as seen. Persists only when something changed.
    /// Returns how many ids were newly marked.
    pub fn mark_read<'a, I>(&mut self, messages: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = &'a Message>,
    {
        let mut added = 0;
        for message in messages {
            if self.horizon.is_some_and(|h| message.timestamp < h) {
                continue;
            }
            if self.seen.insert(message.id, message.timestamp).is_none() {
                added += 1;
            }
        }
        if added > 0 {
            self.trim_to_cap();
            self.persist()?;
        }
        Ok(added)
    }

    /// Treat messages sent before the retention window as read, drop their
    /// entries, and trim to the entry cap. Returns the number of entries removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.seen.len();
        let cutoff = now - self.policy.retention;
        let moved = self.advance_horizon(cutoff);
        self.seen.retain(|_, sent_at| *sent_at >= cutoff);
        self.trim_to_cap();

        let removed = before - self.seen.len();
        if removed > 0 || moved {
            debug!(key = %self.key, removed, "Pruned read-state");
            self.persist()?;
        }
        Ok(removed)
    }

    fn advance_horizon(&mut self, to: DateTime<Utc>) -> bool {
        if self.horizon.is_some_and(|h| h >= to) {
            return false;
        }
        self.horizon = Some(to);
        true
    }

    /// Evict the oldest messages over the cap. The horizon moves just past the
    /// newest evicted one, so every evicted id keeps reading as seen.
    fn trim_to_cap(&mut self) {
        let excess = self.seen.len().saturating_sub(self.policy.max_entries);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(DateTime<Utc>, MessageId)> =
            self.seen.iter().map(|(id, at)| (*at, *id)).collect();
        by_age.sort();
        let Some(&(newest_evicted, _)) = by_age.get(excess - 1) else {
            return;
        };
        let horizon = newest_evicted + Duration::nanoseconds(1);
        self.advance_horizon(horizon);
        self.seen.retain(|_, sent_at| *sent_at >= horizon);
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        let state = PersistedReadState {
            horizon: self.horizon,
            entries: self
                .seen
                .iter()
                .map(|(id, sent_at)| ReadEntry {
                    id: *id,
                    sent_at: *sent_at,
                })
                .collect(),
        };
        save_json(&mut self.store, &self.key, &state)
    }

    pub fn into_store(self) -> S {
        self.store
    }
}
