//! Pending delayed deliveries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use super::message::{AnyMessage, MessageType};

/// A message waiting for its due time.
pub(crate) struct DelayedMessage {
    pub(crate) message_type: MessageType,
    pub(crate) payload: Arc<dyn AnyMessage>,
    pub(crate) send_at: Instant,
    pub(crate) send_time: DateTime<Utc>,
}

impl fmt::Debug for DelayedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedMessage")
            .field("message_type", &self.message_type)
            .field("send_time", &self.send_time)
            .finish()
    }
}

/// Concurrent set of delayed messages, keyed by a random id.
#[derive(Default)]
pub(crate) struct DelayedSet {
    entries: DashMap<Uuid, DelayedMessage>,
}

impl DelayedSet {
    pub(crate) fn insert(&self, message: DelayedMessage) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.insert(id, message);
        id
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    /// Removes and returns every entry due at or before `now + window`, plus the
    /// earliest due time among the entries that stay.
    ///
    /// Ids are collected before removing: a `DashMap` shard must not be written while
    /// an iterator holds it.
    pub(crate) fn take_due(
        &self,
        now: Instant,
        window: Duration,
    ) -> (Vec<DelayedMessage>, Option<Instant>) {
        if self.entries.is_empty() {
            return (Vec::new(), None);
        }

        let horizon = now + window;
        let due: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|entry| entry.send_at <= horizon)
            .map(|entry| *entry.key())
            .collect();

        let taken = due
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|(_, message)| message))
            .collect();
        let next = self.entries.iter().map(|entry| entry.send_at).min();
        (taken, next)
    }
}

impl fmt::Debug for DelayedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedSet")
            .field("len", &self.entries.len())
            .finish()
    }
}
