//! Observed-state cache fed by watch streams.
//!
//! One watch consumer per kind writes; any number of reconcilers read.
//! Entries are swapped whole (`Arc<ResourceRecord>`) so readers never see a
//! partially applied event. Ordering is enforced per identity: an event at
//! or below the cached resourceVersion is discarded. Deletions leave a
//! tombstone so a late Added/Modified for a deleted object cannot resurrect
//! it; tombstones are pruned by the next relist of that kind.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::backend::WatchEvent;
use crate::model::{LabelSelector, Labels, ResourceIdentity, ResourceKind, ResourceRecord, ResourceVersion};

/// Reconciliation trigger emitted for an applied change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub identity: ResourceIdentity,
    /// Owners of the changed record; their reconcilers care about it too.
    pub owners: Vec<ResourceIdentity>,
    /// Labels at the time of the change, for selector fan-out.
    pub labels: Labels,
}

impl Trigger {
    fn from_record(record: &ResourceRecord) -> Self {
        Self {
            identity: record.identity.clone(),
            owners: record.owner_references.iter().cloned().collect(),
            labels: record.labels.clone(),
        }
    }
}

/// What `apply_event` did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Applied(Trigger),
    /// Older than, or equal to, what the cache already holds.
    Stale(ResourceIdentity),
    Bookmark(ResourceKind),
}

#[derive(Default)]
pub struct ObservedCache {
    entries: DashMap<ResourceIdentity, Arc<ResourceRecord>>,
    tombstones: DashMap<ResourceIdentity, ResourceVersion>,
    bookmarks: DashMap<ResourceKind, ResourceVersion>,
    synced: DashMap<ResourceKind, ()>,
}

impl ObservedCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn known_version(&self, identity: &ResourceIdentity) -> Option<ResourceVersion> {
        let cached = self.entries.get(identity).map(|e| e.resource_version);
        let tomb = self.tombstones.get(identity).map(|t| *t);
        cached.max(tomb)
    }

    pub fn apply_event(&self, event: WatchEvent) -> EventOutcome {
        match event {
            WatchEvent::Bookmark {
                kind,
                resource_version,
            } => {
                self.bookmarks
                    .entry(kind)
                    .and_modify(|v| *v = (*v).max(resource_version))
                    .or_insert(resource_version);
                EventOutcome::Bookmark(kind)
            }
            WatchEvent::Added(record) | WatchEvent::Modified(record) => {
                let identity = record.identity.clone();
                if self
                    .known_version(&identity)
                    .is_some_and(|known| known >= record.resource_version)
                {
                    trace!(resource = %identity, version = %record.resource_version, "Discarding stale event");
                    return EventOutcome::Stale(identity);
                }
                let trigger = Trigger::from_record(&record);
                self.tombstones.remove(&identity);
                self.entries.insert(identity, Arc::new(record));
                EventOutcome::Applied(trigger)
            }
            WatchEvent::Deleted(record) => {
                let identity = record.identity.clone();
                if self
                    .known_version(&identity)
                    .is_some_and(|known| known > record.resource_version)
                {
                    trace!(resource = %identity, version = %record.resource_version, "Discarding stale delete");
                    return EventOutcome::Stale(identity);
                }
                let trigger = Trigger::from_record(&record);
                self.entries.remove(&identity);
                self.tombstones.insert(identity, record.resource_version);
                EventOutcome::Applied(trigger)
            }
        }
    }

    /// Replace everything cached for `kind` with a fresh listing.
    ///
    /// Returns triggers for every identity that was added, changed, or
    /// evicted (present locally but absent from the listing, i.e. deleted
    /// while the watch was down).
    pub fn relist(&self, kind: ResourceKind, records: Vec<ResourceRecord>) -> Vec<Trigger> {
        let mut triggers = Vec::new();
        let listed: HashSet<ResourceIdentity> =
            records.iter().map(|r| r.identity.clone()).collect();

        let stale: Vec<Arc<ResourceRecord>> = self
            .entries
            .iter()
            .filter(|e| e.key().kind == kind && !listed.contains(e.key()))
            .map(|e| Arc::clone(e.value()))
            .collect();
        for record in stale {
            debug!(resource = %record.identity, "Evicting object missing from relist");
            self.entries.remove(&record.identity);
            triggers.push(Trigger::from_record(&record));
        }

        self.tombstones.retain(|id, _| id.kind != kind);

        for record in records {
            let changed = self
                .entries
                .get(&record.identity)
                .map_or(true, |cur| **cur != record);
            if changed {
                triggers.push(Trigger::from_record(&record));
                self.entries.insert(record.identity.clone(), Arc::new(record));
            }
        }

        self.synced.insert(kind, ());
        triggers
    }

    pub fn get(&self, identity: &ResourceIdentity) -> Option<Arc<ResourceRecord>> {
        self.entries.get(identity).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, identity: &ResourceIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    /// All cached records of a kind, ordered by identity.
    pub fn list(&self, kind: ResourceKind) -> Vec<Arc<ResourceRecord>> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.key().kind == kind)
            .map(|e| Arc::clone(e.value()))
            .collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        out
    }

    pub fn list_namespace(&self, kind: ResourceKind, namespace: &str) -> Vec<Arc<ResourceRecord>> {
        let mut out = self.list(kind);
        out.retain(|r| r.namespace() == namespace);
        out
    }

    /// Records naming `owner` in their owner references.
    pub fn owned_by(&self, owner: &ResourceIdentity) -> Vec<Arc<ResourceRecord>> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.value().is_owned_by(owner))
            .map(|e| Arc::clone(e.value()))
            .collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        out
    }

    /// Records of `kind` in `namespace` matching `selector`, computed now.
    pub fn select(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Vec<Arc<ResourceRecord>> {
        if selector.is_empty() {
            return Vec::new();
        }
        let mut out = self.list_namespace(kind, namespace);
        out.retain(|r| selector.matches(&r.labels));
        out
    }

    pub fn has_synced(&self, kind: ResourceKind) -> bool {
        self.synced.contains_key(&kind)
    }

    pub fn bookmark(&self, kind: ResourceKind) -> Option<ResourceVersion> {
        self.bookmarks.get(&kind).map(|v| *v)
    }

    pub fn identities(&self) -> Vec<ResourceIdentity> {
        let mut ids: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
