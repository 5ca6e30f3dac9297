//! Tests for single-identity reconciliation passes.

use std::sync::Arc;

use serde_json::json;

use super::*;
use crate::backend::{BackendOp, InMemoryBackend};
use crate::controller::status::{condition, READY, REJECTED};
use crate::model::Labels;

struct Harness {
    desired: Arc<DesiredStateStore>,
    cache: Arc<ObservedCache>,
    backend: Arc<InMemoryBackend>,
    reconciler: Reconciler,
}

fn harness() -> Harness {
    let desired = Arc::new(DesiredStateStore::new());
    let cache = Arc::new(ObservedCache::new());
    let backend = Arc::new(InMemoryBackend::new().with_auto_ready_pods());
    let reconciler = Reconciler::new(
        Arc::clone(&desired),
        Arc::clone(&cache),
        backend.clone() as Arc<dyn StateBackend>,
        ReconcilerConfig::default(),
    );
    Harness {
        desired,
        cache,
        backend,
        reconciler,
    }
}

impl Harness {
    /// Stand-in for the watch consumers: relist every kind.
    fn sync(&self) {
        for kind in ResourceKind::ALL {
            self.cache.relist(kind, self.backend.snapshot(kind));
        }
    }

    /// Reconcile until the pass reports no further work.
    async fn drive(&self, identity: &ResourceIdentity) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..50 {
            self.sync();
            let outcome = self.reconciler.reconcile(identity).await.unwrap();
            let done = !matches!(outcome, ReconcileOutcome::Progressing { .. });
            outcomes.push(outcome);
            if done {
                break;
            }
        }
        outcomes
    }
}

fn deployment(replicas: i64, image: &str) -> serde_json::Value {
    json!({
        "replicas": replicas,
        "selector": {"matchLabels": {"app": "web"}},
        "template": {
            "metadata": {"labels": {"app": "web"}},
            "spec": {"containers": [{"name": "web", "image": image}]}
        }
    })
}

fn web() -> ResourceIdentity {
    ResourceIdentity::new(ResourceKind::Deployment, "default", "web")
}

#[tokio::test]
async fn configmap_is_created_then_converges() {
    let h = harness();
    let id = ResourceIdentity::new(ResourceKind::ConfigMap, "default", "cfg");
    h.desired.apply(id.clone(), json!({"data": {"a": "1"}}), None).unwrap();

    let outcomes = h.drive(&id).await;
    assert_eq!(
        outcomes,
        vec![
            ReconcileOutcome::Progressing {
                executed: 1,
                remaining: 0
            },
            ReconcileOutcome::Converged
        ]
    );
    assert!(h.backend.contains(&id));
    let status = h.desired.get(&id).unwrap().status;
    assert_eq!(status["observedGeneration"], 1);
    assert!(condition(&status, READY).unwrap().is_true());
}

#[tokio::test]
async fn converged_pass_writes_nothing() {
    let h = harness();
    let id = ResourceIdentity::new(ResourceKind::ConfigMap, "default", "cfg");
    h.desired.apply(id.clone(), json!({"data": {"a": "1"}}), None).unwrap();
    h.drive(&id).await;

    let version = h.desired.get(&id).unwrap().resource_version;
    h.backend.clear_journal();
    h.sync();
    assert_eq!(h.reconciler.reconcile(&id).await.unwrap(), ReconcileOutcome::Converged);
    assert!(h.backend.journal().is_empty());
    assert_eq!(h.desired.get(&id).unwrap().resource_version, version);
}

#[tokio::test]
async fn deployment_creates_pods_and_reports_counts() {
    let h = harness();
    h.desired.apply(web(), deployment(3, "nginx:1"), None).unwrap();

    let outcomes = h.drive(&web()).await;
    assert_eq!(outcomes.last(), Some(&ReconcileOutcome::Converged));
    assert_eq!(h.backend.snapshot(ResourceKind::Pod).len(), 3);

    let status = h.desired.get(&web()).unwrap().status;
    assert_eq!(status["replicas"], 3);
    assert_eq!(status["updatedReplicas"], 3);
    assert_eq!(status["readyReplicas"], 3);
}

#[tokio::test]
async fn frozen_observed_object_rejects_change() {
    let h = harness();
    let id = ResourceIdentity::new(ResourceKind::ConfigMap, "default", "frozen");
    h.backend.put(
        ResourceRecord::new(id.clone(), json!({"data": {"a": "1"}, "immutable": true})),
        true,
    );
    h.desired.apply(id.clone(), json!({"data": {"a": "2"}}), None).unwrap();
    h.sync();

    let outcome = h.reconciler.reconcile(&id).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Rejected(Rejection::ImmutableViolation));
    let status = h.desired.get(&id).unwrap().status;
    assert!(condition(&status, REJECTED).unwrap().is_true());
    assert_eq!(h.backend.get(&id).unwrap().spec["data"]["a"], "1");
}

#[tokio::test]
async fn backend_failure_is_retryable_and_degrades_past_threshold() {
    let h = harness();
    let id = ResourceIdentity::new(ResourceKind::ConfigMap, "default", "cfg");
    h.desired.apply(id.clone(), json!({"data": {"a": "1"}}), None).unwrap();
    h.backend.fail_next_writes(10);

    let err = h.reconciler.reconcile(&id).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(!h.reconciler.record_failure(&id, &err, 1));
    assert!(h.reconciler.record_failure(&id, &err, 5));
    assert!(h.reconciler.is_degraded(&id));
    let status = h.desired.get(&id).unwrap().status;
    assert!(condition(&status, status::DEGRADED).unwrap().is_true());

    h.backend.fail_next_writes(0);
    h.drive(&id).await;
    h.reconciler.record_success(&id);
    assert!(!h.reconciler.is_degraded(&id));
    let status = h.desired.get(&id).unwrap().status;
    assert!(!condition(&status, status::DEGRADED).unwrap().is_true());
}

#[tokio::test]
async fn delete_tears_down_children_then_releases_finalizer() {
    let h = harness();
    h.desired.apply(web(), deployment(2, "nginx:1"), None).unwrap();
    h.drive(&web()).await;
    assert_eq!(h.backend.snapshot(ResourceKind::Pod).len(), 2);

    h.desired.delete(&web(), None).unwrap();
    assert!(h.desired.get(&web()).unwrap().is_finalizing());
    h.backend.clear_journal();

    let outcomes = h.drive(&web()).await;
    assert_eq!(outcomes.last(), Some(&ReconcileOutcome::Finalized));
    assert!(!h.desired.contains(&web()));
    assert!(h.backend.snapshot(ResourceKind::Pod).is_empty());
    assert!(!h.backend.contains(&web()));

    // Children go before the parent.
    let journal = h.backend.journal();
    assert_eq!(journal.last(), Some(&BackendOp::Delete(web())));
}

#[tokio::test]
async fn top_level_object_without_desired_record_is_deleted() {
    let h = harness();
    let id = ResourceIdentity::new(ResourceKind::Service, "default", "stray");
    h.backend.put(ResourceRecord::new(id.clone(), json!({"ports": [{"port": 80}]})), true);
    h.sync();

    let outcome = h.reconciler.reconcile(&id).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Progressing { executed: 1, .. }));
    assert!(!h.backend.contains(&id));
}

#[tokio::test]
async fn service_endpoints_follow_selector() {
    let h = harness();
    let svc = ResourceIdentity::new(ResourceKind::Service, "default", "web");
    h.desired
        .apply(svc.clone(), json!({"selector": {"app": "web"}, "ports": [{"port": 80}]}), None)
        .unwrap();
    let mut labels = Labels::new();
    labels.insert("app".into(), "web".into());
    h.backend.put(
        ResourceRecord::new(ResourceIdentity::new(ResourceKind::Pod, "default", "web-a"), json!({}))
            .with_labels(labels)
            .with_status(json!({"phase": "Running", "ready": true})),
        true,
    );

    h.drive(&svc).await;
    let status = h.desired.get(&svc).unwrap().status;
    assert_eq!(status["endpoints"], json!(["web-a"]));
}

#[tokio::test]
async fn stale_update_surfaces_conflict() {
    let h = harness();
    let id = ResourceIdentity::new(ResourceKind::ConfigMap, "default", "cfg");
    h.desired.apply(id.clone(), json!({"data": {"a": "1"}}), None).unwrap();
    h.drive(&id).await;

    // Desired changes while the cache still holds an old version.
    h.desired.apply(id.clone(), json!({"data": {"a": "2"}}), None).unwrap();
    h.sync();
    let mut bumped = h.backend.get(&id).unwrap();
    bumped.status = json!({"touched": true});
    h.backend.put(bumped, true);

    let err = h.reconciler.reconcile(&id).await.unwrap_err();
    match err {
        ReconcileError::ActionExecution { source, .. } => assert!(source.is_conflict()),
        other => panic!("expected conflict, got {}", other),
    }
    // The backend copy is untouched.
    assert_eq!(h.backend.get(&id).unwrap().spec["data"]["a"], "1");
}
