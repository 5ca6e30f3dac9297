//! In-process backend used by the binary and the test suite.
//!
//! Behaves like a small API server: a versioned object map with per-kind
//! watch fan-out. It can simulate a kubelet (pods become ready on create),
//! inject write/list failures and drop watch connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{BackendError, StateBackend, WatchEvent, WatchStream};
use crate::model::{Labels, ResourceIdentity, ResourceKind, ResourceRecord, ResourceVersion};

const WATCH_BUFFER: usize = 1024;

/// A mutation as recorded in the backend journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOp {
    Write(ResourceIdentity),
    Delete(ResourceIdentity),
}

#[derive(Debug, Default)]
struct Faults {
    fail_writes: u32,
    fail_deletes: u32,
    fail_lists: u32,
    failing_kind: Option<ResourceKind>,
}

pub struct InMemoryBackend {
    objects: RwLock<HashMap<ResourceIdentity, ResourceRecord>>,
    version: AtomicU64,
    watchers: Mutex<HashMap<ResourceKind, Vec<mpsc::Sender<WatchEvent>>>>,
    faults: Mutex<Faults>,
    journal: Mutex<Vec<BackendOp>>,
    auto_ready: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            version: AtomicU64::new(1),
            watchers: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            journal: Mutex::new(Vec::new()),
            auto_ready: AtomicBool::new(false),
        }
    }

    /// Simulated kubelet: pods report Running/ready as soon as they are
    /// created; pods owned by a Job report Succeeded.
    pub fn with_auto_ready_pods(self) -> Self {
        self.auto_ready.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_auto_ready_pods(&self, enabled: bool) {
        self.auto_ready.store(enabled, Ordering::SeqCst);
    }

    fn bump(&self) -> ResourceVersion {
        ResourceVersion::new(self.version.fetch_add(1, Ordering::SeqCst))
    }

    /// Fan an event out to the kind's watchers. A full or closed channel
    /// drops that watcher, which the consumer sees as a disconnect.
    fn emit(&self, kind: ResourceKind, event: WatchEvent) {
        let mut watchers = self.watchers.lock();
        if let Some(senders) = watchers.get_mut(&kind) {
            senders.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(kind = %kind, "Watch consumer too slow, dropping stream");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }

    fn kubelet_status(&self, record: &ResourceRecord) -> Value {
        let job_owned = record
            .owner_references
            .iter()
            .any(|o| o.kind == ResourceKind::Job);
        if job_owned {
            json!({"phase": "Succeeded", "ready": false})
        } else {
            json!({"phase": "Running", "ready": true})
        }
    }

    fn take_fault(counter: &mut u32) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }

    /// Fail the next `n` writes with `Unavailable`.
    pub fn fail_next_writes(&self, n: u32) {
        self.faults.lock().fail_writes = n;
    }

    pub fn fail_next_deletes(&self, n: u32) {
        self.faults.lock().fail_deletes = n;
    }

    pub fn fail_next_lists(&self, n: u32) {
        self.faults.lock().fail_lists = n;
    }

    /// Fail every write and delete touching `kind` until cleared with `None`.
    pub fn fail_kind(&self, kind: Option<ResourceKind>) {
        self.faults.lock().failing_kind = kind;
    }

    /// Close every open watch (all kinds, or one).
    pub fn disconnect_watchers(&self, kind: Option<ResourceKind>) {
        let mut watchers = self.watchers.lock();
        match kind {
            Some(kind) => {
                watchers.remove(&kind);
            }
            None => watchers.clear(),
        }
    }

    pub fn watcher_count(&self, kind: ResourceKind) -> usize {
        self.watchers
            .lock()
            .get(&kind)
            .map(|v| v.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Emit a bookmark carrying the current version.
    pub fn send_bookmark(&self, kind: ResourceKind) {
        let resource_version = ResourceVersion::new(self.version.load(Ordering::SeqCst));
        self.emit(
            kind,
            WatchEvent::Bookmark {
                kind,
                resource_version,
            },
        );
    }

    /// Register (or relabel) a node.
    pub fn register_node(&self, name: &str, labels: Labels) -> ResourceVersion {
        let identity = ResourceIdentity::cluster(ResourceKind::Node, name);
        let record = ResourceRecord::new(identity.clone(), json!({})).with_labels(labels);
        self.put(record, false)
    }

    pub fn remove_node(&self, name: &str) -> bool {
        let identity = ResourceIdentity::cluster(ResourceKind::Node, name);
        self.remove(&identity, true)
    }

    /// Overwrite an object's status, as a kubelet or load balancer would.
    pub fn set_status(&self, identity: &ResourceIdentity, status: Value) -> Result<(), BackendError> {
        let mut objects = self.objects.write();
        let existing = objects
            .get_mut(identity)
            .ok_or_else(|| BackendError::NotFound(identity.clone()))?;
        existing.status = status;
        existing.resource_version = self.bump();
        let event = WatchEvent::Modified(existing.clone());
        self.emit(identity.kind, event);
        Ok(())
    }

    /// Remove without emitting a watch event, as if the event were lost
    /// while the watch was down.
    pub fn remove_silently(&self, identity: &ResourceIdentity) -> bool {
        self.remove(identity, false)
    }

    fn remove(&self, identity: &ResourceIdentity, notify: bool) -> bool {
        let mut objects = self.objects.write();
        let Some(mut removed) = objects.remove(identity) else {
            return false;
        };
        removed.resource_version = self.bump();
        if notify {
            self.emit(identity.kind, WatchEvent::Deleted(removed));
        }
        true
    }

    /// Insert directly, bypassing fault injection and the journal.
    pub fn put(&self, mut record: ResourceRecord, silent: bool) -> ResourceVersion {
        let mut objects = self.objects.write();
        let version = self.bump();
        record.resource_version = version;
        record.creation_timestamp.get_or_insert_with(Utc::now);
        let identity = record.identity.clone();
        let existed = objects.insert(identity.clone(), record.clone()).is_some();
        if !silent {
            let event = if existed {
                WatchEvent::Modified(record)
            } else {
                WatchEvent::Added(record)
            };
            self.emit(identity.kind, event);
        }
        version
    }

    pub fn get(&self, identity: &ResourceIdentity) -> Option<ResourceRecord> {
        self.objects.read().get(identity).cloned()
    }

    pub fn contains(&self, identity: &ResourceIdentity) -> bool {
        self.objects.read().contains_key(identity)
    }

    /// Snapshot of one kind, ordered by identity.
    pub fn snapshot(&self, kind: ResourceKind) -> Vec<ResourceRecord> {
        let mut out: Vec<_> = self
            .objects
            .read()
            .values()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        out
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Mutations in the order they were applied.
    pub fn journal(&self) -> Vec<BackendOp> {
        self.journal.lock().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for InMemoryBackend {
    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, BackendError> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        self.watchers.lock().entry(kind).or_default().push(tx);
        debug!(kind = %kind, "Watch opened");
        Ok(rx)
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ResourceRecord>, BackendError> {
        if Self::take_fault(&mut self.faults.lock().fail_lists) {
            return Err(BackendError::Unavailable(format!("list {} failed", kind)));
        }
        Ok(self.snapshot(kind))
    }

    async fn write(
        &self,
        identity: &ResourceIdentity,
        mut record: ResourceRecord,
        expected: Option<ResourceVersion>,
    ) -> Result<ResourceVersion, BackendError> {
        {
            let mut faults = self.faults.lock();
            if faults.failing_kind == Some(identity.kind) || Self::take_fault(&mut faults.fail_writes)
            {
                return Err(BackendError::Unavailable(format!("write {} failed", identity)));
            }
        }

        let mut objects = self.objects.write();
        let existing = objects.get(identity);
        if let Some(expected) = expected {
            match existing {
                None => return Err(BackendError::NotFound(identity.clone())),
                Some(current) if current.resource_version != expected => {
                    return Err(BackendError::Conflict {
                        identity: identity.clone(),
                        expected,
                        current: current.resource_version,
                    })
                }
                Some(_) => {}
            }
        }

        record.identity = identity.clone();
        if record.status.is_null() {
            match existing {
                Some(current) => record.status = current.status.clone(),
                None if identity.kind == ResourceKind::Pod
                    && self.auto_ready.load(Ordering::SeqCst) =>
                {
                    record.status = self.kubelet_status(&record);
                }
                None => {}
            }
        }
        let existed = existing.is_some();
        record.creation_timestamp = match existing {
            Some(current) => current.creation_timestamp,
            None => Some(Utc::now()),
        };

        let version = self.bump();
        record.resource_version = version;
        objects.insert(identity.clone(), record.clone());
        self.journal.lock().push(BackendOp::Write(identity.clone()));

        let event = if existed {
            WatchEvent::Modified(record)
        } else {
            WatchEvent::Added(record)
        };
        self.emit(identity.kind, event);
        debug!(resource = %identity, version = %version, "Backend write");
        Ok(version)
    }

    async fn delete(
        &self,
        identity: &ResourceIdentity,
        expected: Option<ResourceVersion>,
    ) -> Result<(), BackendError> {
        {
            let mut faults = self.faults.lock();
            if faults.failing_kind == Some(identity.kind)
                || Self::take_fault(&mut faults.fail_deletes)
            {
                return Err(BackendError::Unavailable(format!("delete {} failed", identity)));
            }
        }

        let mut objects = self.objects.write();
        let current = objects
            .get(identity)
            .ok_or_else(|| BackendError::NotFound(identity.clone()))?;
        if let Some(expected) = expected {
            if current.resource_version != expected {
                return Err(BackendError::Conflict {
                    identity: identity.clone(),
                    expected,
                    current: current.resource_version,
                });
            }
        }
        if let Some(mut removed) = objects.remove(identity) {
            removed.resource_version = self.bump();
            self.journal.lock().push(BackendOp::Delete(identity.clone()));
            self.emit(identity.kind, WatchEvent::Deleted(removed));
            debug!(resource = %identity, "Backend delete");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(name: &str) -> ResourceIdentity {
        ResourceIdentity::new(ResourceKind::Pod, "default", name)
    }

    #[tokio::test]
    async fn test_write_emits_added_then_modified() {
        let backend = InMemoryBackend::new();
        let mut rx = backend.watch(ResourceKind::Pod).await.unwrap();
        let id = pod("a");
        backend
            .write(&id, ResourceRecord::new(id.clone(), json!({})), None)
            .await
            .unwrap();
        backend
            .write(&id, ResourceRecord::new(id.clone(), json!({"x": 1})), None)
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(WatchEvent::Added(_))));
        assert!(matches!(rx.recv().await, Some(WatchEvent::Modified(_))));
    }

    #[tokio::test]
    async fn test_stale_expected_version_conflicts() {
        let backend = InMemoryBackend::new();
        let id = pod("a");
        let v1 = backend
            .write(&id, ResourceRecord::new(id.clone(), json!({})), None)
            .await
            .unwrap();
        backend
            .write(&id, ResourceRecord::new(id.clone(), json!({"x": 1})), Some(v1))
            .await
            .unwrap();
        let err = backend
            .write(&id, ResourceRecord::new(id.clone(), json!({"x": 2})), Some(v1))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_auto_ready_pods() {
        let backend = InMemoryBackend::new().with_auto_ready_pods();
        let id = pod("a");
        backend
            .write(&id, ResourceRecord::new(id.clone(), json!({})), None)
            .await
            .unwrap();
        assert_eq!(backend.get(&id).unwrap().status["ready"], true);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let backend = InMemoryBackend::new();
        backend.fail_next_writes(1);
        let id = pod("a");
        let rec = ResourceRecord::new(id.clone(), json!({}));
        assert!(backend.write(&id, rec.clone(), None).await.is_err());
        assert!(backend.write(&id, rec, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_closes_stream() {
        let backend = InMemoryBackend::new();
        let mut rx = backend.watch(ResourceKind::Pod).await.unwrap();
        backend.disconnect_watchers(None);
        assert!(rx.recv().await.is_none());
    }
}
