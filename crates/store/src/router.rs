//! Classifies notifications and keeps the snapshot cache in step with them.

use chrono::{DateTime, Utc};
use kwatch_core::{resource_version, ChangeEvent, ChangeKind, RawEvent, ResourceIdentity};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::SnapshotCache;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("{action} notification for an object without metadata.name")]
    MissingIdentity { action: ChangeKind },
}

/// Event router for one watched kind. Owns that kind's cache.
#[derive(Debug)]
pub struct EventRouter {
    kind: String,
    cache: SnapshotCache,
}

impl EventRouter {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), cache: SnapshotCache::new() }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Apply one notification to the cache and pair it with the previous revision.
    ///
    /// - CREATE caches the object. A CREATE for an object that is already cached
    ///   (replayed or duplicated notification) is diffed against the cached revision.
    /// - UPDATE replaces the cached revision; the previous side is absent if the
    ///   object was never seen.
    /// - DELETE drops the cached revision.
    pub fn route(&mut self, event: RawEvent, now: DateTime<Utc>) -> Result<ChangeEvent, RouteError> {
        let identity = ResourceIdentity::from_document(&self.kind, &event.object)
            .ok_or(RouteError::MissingIdentity { action: event.kind })?;
        let previous = self.cache.get(&identity);

        match event.kind {
            ChangeKind::Create => {
                if let Some(prev) = &previous {
                    warn!(
                        object = %identity,
                        cached_rv = resource_version(&prev.raw).unwrap_or("-"),
                        rv = resource_version(&event.object).unwrap_or("-"),
                        "CREATE for an object that is already cached; diffing against the cached revision"
                    );
                }
                self.cache.set(identity.clone(), event.object.clone(), now);
            }
            ChangeKind::Update => {
                if previous.is_none() {
                    debug!(object = %identity, "UPDATE without a cached revision");
                }
                self.cache.set(identity.clone(), event.object.clone(), now);
            }
            ChangeKind::Delete => {
                self.cache.delete(&identity);
            }
        }

        Ok(ChangeEvent { kind: event.kind, identity, current: event.object, observed_at: now, previous })
    }
}
