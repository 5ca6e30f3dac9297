//! Desired-state store.
//!
//! Holds the authoritative submitted spec per identity. Writes are
//! linearizable per identity (single write lock) and publish change events
//! that drive the work queue. Status writes never bump `generation` and
//! never publish events, so a controller writing status cannot retrigger
//! itself.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::error::StoreError;
use crate::model::validate::validate_labels;
use crate::model::{
    validate_identity, validate_spec, Labels, Manifest, ResourceIdentity, ResourceKind,
    ResourceRecord, ResourceVersion, ValidationError,
};

/// Finalizer attached to every record the store creates. The controller
/// removes it once the observed object and its children are gone.
pub const CONTROLLER_FINALIZER: &str = "reconcile-core/cleanup";

const EVENT_CAPACITY: usize = 1024;

/// Change notifications published by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredEvent {
    /// Created, or spec/metadata changed.
    Applied(ResourceIdentity),
    /// Deletion requested; finalizers still pending.
    Deleting(ResourceIdentity),
    /// Record removed from the store.
    Purged(ResourceIdentity),
}

impl DesiredEvent {
    pub fn identity(&self) -> &ResourceIdentity {
        match self {
            Self::Applied(id) | Self::Deleting(id) | Self::Purged(id) => id,
        }
    }
}

/// Metadata that accompanies a spec on apply. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ApplyMeta {
    pub labels: Option<Labels>,
    pub owner_references: Option<BTreeSet<ResourceIdentity>>,
}

pub struct DesiredStateStore {
    records: RwLock<HashMap<ResourceIdentity, ResourceRecord>>,
    next_version: AtomicU64,
    events: broadcast::Sender<DesiredEvent>,
}

impl DesiredStateStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            events,
        }
    }

    fn bump(&self) -> ResourceVersion {
        ResourceVersion::new(self.next_version.fetch_add(1, Ordering::SeqCst))
    }

    fn publish(&self, event: DesiredEvent) {
        // No subscribers is fine: nothing is running yet.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DesiredEvent> {
        self.events.subscribe()
    }

    /// Apply a spec, keeping existing labels and owners.
    pub fn apply(
        &self,
        identity: ResourceIdentity,
        spec: Value,
        expected: Option<ResourceVersion>,
    ) -> Result<ResourceRecord, StoreError> {
        self.apply_with(identity, spec, ApplyMeta::default(), expected)
    }

    /// Apply a parsed manifest (spec, labels and owner references).
    pub fn apply_manifest(
        &self,
        manifest: &Manifest,
        expected: Option<ResourceVersion>,
    ) -> Result<ResourceRecord, StoreError> {
        self.apply_with(
            manifest.identity.clone(),
            manifest.spec.clone(),
            ApplyMeta {
                labels: Some(manifest.labels.clone()),
                owner_references: Some(manifest.owner_references.clone()),
            },
            expected,
        )
    }

    /// Create or update. Re-applying an identical spec and metadata is a
    /// no-op returning the stored record unchanged.
    pub fn apply_with(
        &self,
        identity: ResourceIdentity,
        spec: Value,
        meta: ApplyMeta,
        expected: Option<ResourceVersion>,
    ) -> Result<ResourceRecord, StoreError> {
        validate_identity(&identity)?;
        if identity.kind.is_observed_only() {
            return Err(ValidationError::new(
                "kind",
                format!("{} is observed-only", identity.kind),
            )
            .into());
        }
        if let Some(labels) = &meta.labels {
            validate_labels(labels)?;
        }
        validate_spec(identity.kind, &spec)?;

        let (record, event) = {
            let mut records = self.records.write();
            match records.get_mut(&identity) {
                None => {
                    if let Some(expected) = expected {
                        return Err(StoreError::Conflict {
                            identity,
                            expected,
                            current: None,
                        });
                    }
                    let mut record = ResourceRecord::new(identity.clone(), spec)
                        .with_labels(meta.labels.unwrap_or_default())
                        .with_version(self.bump());
                    record.owner_references = meta.owner_references.unwrap_or_default();
                    record.finalizers.insert(CONTROLLER_FINALIZER.to_string());
                    records.insert(identity.clone(), record.clone());
                    info!(resource = %identity, version = %record.resource_version, "Created desired record");
                    (record, Some(DesiredEvent::Applied(identity)))
                }
                Some(existing) => {
                    if existing.is_finalizing() {
                        return Err(StoreError::Terminating(identity));
                    }
                    if let Some(expected) = expected {
                        if expected != existing.resource_version {
                            return Err(StoreError::Conflict {
                                identity,
                                expected,
                                current: Some(existing.resource_version),
                            });
                        }
                    }

                    let spec_changed = existing.spec != spec;
                    let labels_changed =
                        meta.labels.as_ref().is_some_and(|l| *l != existing.labels);
                    let owners_changed = meta
                        .owner_references
                        .as_ref()
                        .is_some_and(|o| *o != existing.owner_references);

                    if !spec_changed && !labels_changed && !owners_changed {
                        debug!(resource = %identity, "Apply is a no-op");
                        (existing.clone(), None)
                    } else {
                        if spec_changed && is_frozen(existing) {
                            return Err(StoreError::ImmutableViolation { identity });
                        }
                        if spec_changed {
                            existing.spec = spec;
                            existing.generation += 1;
                        }
                        if let Some(labels) = meta.labels {
                            existing.labels = labels;
                        }
                        if let Some(owners) = meta.owner_references {
                            existing.owner_references = owners;
                        }
                        existing.resource_version = self.bump();
                        info!(
                            resource = %identity,
                            generation = existing.generation,
                            version = %existing.resource_version,
                            "Updated desired record"
                        );
                        (existing.clone(), Some(DesiredEvent::Applied(identity)))
                    }
                }
            }
        };

        if let Some(event) = event {
            self.publish(event);
        }
        Ok(record)
    }

    pub fn get(&self, identity: &ResourceIdentity) -> Result<ResourceRecord, StoreError> {
        self.records
            .read()
            .get(identity)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(identity.clone()))
    }

    pub fn contains(&self, identity: &ResourceIdentity) -> bool {
        self.records.read().contains_key(identity)
    }

    /// All records of a kind, ordered by identity.
    pub fn list(&self, kind: ResourceKind) -> Vec<ResourceRecord> {
        let mut out: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        out
    }

    pub fn identities(&self) -> Vec<ResourceIdentity> {
        let mut ids: Vec<_> = self.records.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Request deletion. With finalizers pending the record is marked
    /// (`deletionTimestamp`) and stays readable; otherwise it is purged.
    /// Deleting a record that is already finalizing is a no-op.
    pub fn delete(
        &self,
        identity: &ResourceIdentity,
        expected: Option<ResourceVersion>,
    ) -> Result<(), StoreError> {
        let event = {
            let mut records = self.records.write();
            let existing = records
                .get_mut(identity)
                .ok_or_else(|| StoreError::NotFound(identity.clone()))?;
            if let Some(expected) = expected {
                if expected != existing.resource_version {
                    return Err(StoreError::Conflict {
                        identity: identity.clone(),
                        expected,
                        current: Some(existing.resource_version),
                    });
                }
            }
            if existing.is_finalizing() {
                return Ok(());
            }
            if existing.finalizers.is_empty() {
                records.remove(identity);
                info!(resource = %identity, "Purged desired record");
                DesiredEvent::Purged(identity.clone())
            } else {
                existing.deletion_timestamp = Some(Utc::now());
                existing.resource_version = self.bump();
                info!(
                    resource = %identity,
                    finalizers = existing.finalizers.len(),
                    "Marked desired record for deletion"
                );
                DesiredEvent::Deleting(identity.clone())
            }
        };
        self.publish(event);
        Ok(())
    }

    /// Replace the status document. Identical status is a no-op.
    pub fn update_status(
        &self,
        identity: &ResourceIdentity,
        status: Value,
        expected: Option<ResourceVersion>,
    ) -> Result<ResourceRecord, StoreError> {
        let mut records = self.records.write();
        let existing = records
            .get_mut(identity)
            .ok_or_else(|| StoreError::NotFound(identity.clone()))?;
        if let Some(expected) = expected {
            if expected != existing.resource_version {
                return Err(StoreError::Conflict {
                    identity: identity.clone(),
                    expected,
                    current: Some(existing.resource_version),
                });
            }
        }
        if existing.status != status {
            existing.status = status;
            existing.resource_version = self.bump();
        }
        Ok(existing.clone())
    }

    pub fn add_finalizer(
        &self,
        identity: &ResourceIdentity,
        finalizer: &str,
    ) -> Result<ResourceRecord, StoreError> {
        let mut records = self.records.write();
        let existing = records
            .get_mut(identity)
            .ok_or_else(|| StoreError::NotFound(identity.clone()))?;
        if existing.is_finalizing() {
            return Err(StoreError::Terminating(identity.clone()));
        }
        if existing.finalizers.insert(finalizer.to_string()) {
            existing.resource_version = self.bump();
        }
        Ok(existing.clone())
    }

    /// Drop a finalizer. Returns `None` when this purged the record.
    pub fn remove_finalizer(
        &self,
        identity: &ResourceIdentity,
        finalizer: &str,
    ) -> Result<Option<ResourceRecord>, StoreError> {
        let (result, event) = {
            let mut records = self.records.write();
            let existing = records
                .get_mut(identity)
                .ok_or_else(|| StoreError::NotFound(identity.clone()))?;
            if !existing.finalizers.remove(finalizer) {
                return Ok(Some(existing.clone()));
            }
            if existing.is_finalizing() && existing.finalizers.is_empty() {
                records.remove(identity);
                info!(resource = %identity, "Finalizers cleared, purged desired record");
                (None, Some(DesiredEvent::Purged(identity.clone())))
            } else {
                existing.resource_version = self.bump();
                (Some(existing.clone()), None)
            }
        };
        if let Some(event) = event {
            self.publish(event);
        }
        Ok(result)
    }

    /// Records whose owners have all disappeared from the store.
    pub fn orphans(&self) -> Vec<ResourceIdentity> {
        let records = self.records.read();
        let mut out: Vec<_> = records
            .values()
            .filter(|r| !r.owner_references.is_empty() && !r.is_finalizing())
            .filter(|r| r.owner_references.iter().all(|o| !records.contains_key(o)))
            .map(|r| r.identity.clone())
            .collect();
        out.sort();
        out
    }
}

impl Default for DesiredStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_frozen(record: &ResourceRecord) -> bool {
    record.kind().supports_immutable()
        && record.spec.get("immutable").and_then(Value::as_bool) == Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cm(name: &str) -> ResourceIdentity {
        ResourceIdentity::new(ResourceKind::ConfigMap, "default", name)
    }

    #[test]
    fn test_create_sets_finalizer_and_generation() {
        let store = DesiredStateStore::new();
        let rec = store.apply(cm("a"), json!({"data": {"k": "v"}}), None).unwrap();
        assert_eq!(rec.generation, 1);
        assert!(rec.finalizers.contains(CONTROLLER_FINALIZER));
        assert!(rec.resource_version > ResourceVersion::default());
    }

    #[test]
    fn test_status_write_keeps_generation() {
        let store = DesiredStateStore::new();
        let rec = store.apply(cm("a"), json!({"data": {}}), None).unwrap();
        let updated = store
            .update_status(&rec.identity, json!({"observedGeneration": 1}), None)
            .unwrap();
        assert_eq!(updated.generation, rec.generation);
        assert!(updated.resource_version > rec.resource_version);

        let again = store
            .update_status(&rec.identity, json!({"observedGeneration": 1}), None)
            .unwrap();
        assert_eq!(again.resource_version, updated.resource_version);
    }

    #[test]
    fn test_status_write_publishes_nothing() {
        let store = DesiredStateStore::new();
        let rec = store.apply(cm("a"), json!({}), None).unwrap();
        let mut rx = store.subscribe();
        store.update_status(&rec.identity, json!({"x": 1}), None).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_delete_without_finalizers_purges() {
        let store = DesiredStateStore::new();
        let rec = store.apply(cm("a"), json!({}), None).unwrap();
        store.remove_finalizer(&rec.identity, CONTROLLER_FINALIZER).unwrap();
        store.delete(&rec.identity, None).unwrap();
        assert!(store.get(&rec.identity).unwrap_err().is_not_found());
    }

    #[test]
    fn test_orphans() {
        let store = DesiredStateStore::new();
        let owner = ResourceIdentity::new(ResourceKind::Deployment, "default", "gone");
        store
            .apply_with(
                cm("child"),
                json!({}),
                ApplyMeta {
                    labels: None,
                    owner_references: Some([owner].into_iter().collect()),
                },
                None,
            )
            .unwrap();
        store.apply(cm("free"), json!({}), None).unwrap();
        assert_eq!(store.orphans(), vec![cm("child")]);
    }
}
