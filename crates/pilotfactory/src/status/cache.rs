use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::utils::time::now_monotonic;
use crate::status::BackendIdentity;
use crate::status::snapshot::Snapshot;

/// Latest snapshot of every backend identity.
///
/// This is only a freshness gate: reads never block on a poller and never trigger a query.
/// Each identity has a single writer (its poller) and entries are swapped as a whole, so a
/// reader either sees a complete snapshot or nothing.
pub struct SnapshotCache<S> {
    entries: DashMap<BackendIdentity, Arc<S>>,
}

impl<S: Snapshot> Default for SnapshotCache<S> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<S: Snapshot> SnapshotCache<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the snapshot, replacing any previous one (last write wins).
    pub fn put(&self, identity: &BackendIdentity, snapshot: S) {
        self.entries.insert(identity.clone(), Arc::new(snapshot));
    }

    /// Returns the latest snapshot unless it is older than `max_age`.
    /// A zero `max_age` disables the age check.
    pub fn get(&self, identity: &BackendIdentity, max_age: Duration) -> Option<Arc<S>> {
        self.get_at(identity, max_age, now_monotonic())
    }

    pub fn get_at(
        &self,
        identity: &BackendIdentity,
        max_age: Duration,
        now: Instant,
    ) -> Option<Arc<S>> {
        // Clone the Arc out so that the shard lock is released right away
        let snapshot = self.entries.get(identity)?.value().clone();
        if !max_age.is_zero() && now.saturating_duration_since(snapshot.captured_at()) > max_age {
            log::debug!(
                "Snapshot of {identity} is older than {}, ignoring it",
                humantime::format_duration(max_age)
            );
            return None;
        }
        Some(snapshot)
    }

    pub fn remove(&self, identity: &BackendIdentity) {
        self.entries.remove(identity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
