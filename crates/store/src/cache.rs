//! Per-kind snapshot cache.

use chrono::{DateTime, Utc};
use kwatch_core::{Document, ResourceIdentity, Snapshot};
use rustc_hash::FxHashMap;

/// Last observed revision of every object of one watched kind.
///
/// Exactly one consumer task owns a cache, so no locking is done here. Sharing
/// one instance between tasks breaks the per-kind event order it mirrors; adding
/// producers for a kind requires putting get/set/delete behind a lock.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    entries: FxHashMap<ResourceIdentity, Snapshot>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &ResourceIdentity) -> bool {
        self.entries.contains_key(id)
    }

    /// Copy of the cached snapshot; callers cannot mutate stored state.
    pub fn get(&self, id: &ResourceIdentity) -> Option<Snapshot> {
        self.entries.get(id).cloned()
    }

    /// Insert or replace (never merge) the snapshot for `id`.
    pub fn set(&mut self, id: ResourceIdentity, raw: Document, now: DateTime<Utc>) {
        self.entries.insert(id, Snapshot { raw, seen_at: now });
    }

    /// Remove `id`; a no-op when it is not cached.
    pub fn delete(&mut self, id: &ResourceIdentity) -> Option<Snapshot> {
        self.entries.remove(id)
    }
}
