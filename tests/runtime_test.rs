//! End-to-end controller runs against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use reconcile_core::backend::{BackendOp, StateBackend};
use reconcile_core::controller::status::{condition, DEGRADED, READY};
use reconcile_core::controller::{ReconcilerConfig, WatchConfig};
use reconcile_core::health::HealthState;
use reconcile_core::model::{Manifest, ResourceIdentity, ResourceKind, ResourceRecord};
use reconcile_core::plan::pods::{self, POD_TEMPLATE_HASH};
use reconcile_core::scheduler::BackoffConfig;
use reconcile_core::shutdown::ShutdownResult;
use reconcile_core::{ControllerRuntime, InMemoryBackend, RuntimeConfig};
use serde_json::{json, Value};

const IDLE: Duration = Duration::from_secs(10);

fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        workers: 2,
        resync_period: Duration::from_secs(3600),
        shutdown_timeout: Duration::from_secs(2),
        backoff: BackoffConfig {
            base: Duration::from_millis(1),
            max: Duration::from_millis(20),
            jitter: 0.0,
        },
        reconciler: ReconcilerConfig {
            max_failures: 3,
            rollout_requeue: Duration::from_millis(5),
        },
        watch: WatchConfig {
            relist_backoff: Duration::from_millis(10),
        },
        ..RuntimeConfig::default()
    }
}

fn start() -> (ControllerRuntime, Arc<InMemoryBackend>) {
    let backend = Arc::new(InMemoryBackend::new().with_auto_ready_pods());
    let runtime = ControllerRuntime::new(fast_config(), backend.clone() as Arc<dyn StateBackend>);
    runtime.start();
    (runtime, backend)
}

/// Poll `check` until it holds or five seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn web() -> ResourceIdentity {
    ResourceIdentity::new(ResourceKind::Deployment, "default", "web")
}

fn web_spec(replicas: i64, image: &str) -> Value {
    json!({
        "replicas": replicas,
        "selector": {"matchLabels": {"app": "web"}},
        "strategy": {"type": "RollingUpdate", "rollingUpdate": {"maxSurge": 1, "maxUnavailable": 1}},
        "template": {
            "metadata": {"labels": {"app": "web"}},
            "spec": {"containers": [{"name": "web", "image": image}]}
        }
    })
}

fn db_spec(replicas: i64) -> Value {
    json!({
        "replicas": replicas,
        "serviceName": "db",
        "selector": {"matchLabels": {"app": "db"}},
        "template": {
            "metadata": {"labels": {"app": "db"}},
            "spec": {"containers": [{"name": "db", "image": "postgres:16"}]}
        }
    })
}

fn pods_of(backend: &InMemoryBackend, owner: &ResourceIdentity) -> Vec<ResourceRecord> {
    backend
        .snapshot(ResourceKind::Pod)
        .into_iter()
        .filter(|p| p.is_owned_by(owner))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn manifest_deployment_converges_with_status() {
    let (runtime, backend) = start();
    let manifests = Manifest::parse_str(
        r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 3
  selector:
    matchLabels:
      app: web
  template:
    metadata:
      labels:
        app: web
    spec:
      containers:
        - name: web
          image: nginx:1.25
"#,
    )
    .unwrap();
    runtime.apply_manifest(&manifests[0]).unwrap();

    assert!(runtime.wait_for_idle(IDLE).await);
    assert!(backend.contains(&web()));
    assert_eq!(pods_of(&backend, &web()).len(), 3);

    let status = runtime.desired().get(&web()).unwrap().status;
    assert_eq!(status["readyReplicas"], 3);
    assert_eq!(status["observedGeneration"], 1);
    assert!(condition(&status, READY).unwrap().is_true());

    let health = runtime.health_report();
    assert_eq!(health.state, HealthState::Healthy);
    assert!(health.ready);

    assert_eq!(runtime.shutdown().await, ShutdownResult::Complete);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn image_change_rolls_every_pod() {
    let (runtime, backend) = start();
    runtime.desired().apply(web(), web_spec(3, "nginx:1"), None).unwrap();
    assert!(runtime.wait_for_idle(IDLE).await);

    let updated = runtime.desired().apply(web(), web_spec(3, "nginx:2"), None).unwrap();
    assert!(runtime.wait_for_idle(IDLE).await);

    let hash = pods::template_hash(&pods::template_of(&updated.spec));
    let pods = pods_of(&backend, &web());
    assert_eq!(pods.len(), 3);
    assert!(pods.iter().all(|p| p.label(POD_TEMPLATE_HASH) == Some(hash.as_str())));
    assert_eq!(runtime.desired().get(&web()).unwrap().status["observedGeneration"], 2);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn statefulset_scale_down_deletes_highest_ordinal_first() {
    let (runtime, backend) = start();
    let db = ResourceIdentity::new(ResourceKind::StatefulSet, "default", "db");
    runtime.desired().apply(db.clone(), db_spec(3), None).unwrap();
    assert!(runtime.wait_for_idle(IDLE).await);
    assert_eq!(pods_of(&backend, &db).len(), 3);

    backend.clear_journal();
    runtime.desired().apply(db.clone(), db_spec(1), None).unwrap();
    assert!(runtime.wait_for_idle(IDLE).await);

    let deleted: Vec<String> = backend
        .journal()
        .into_iter()
        .filter_map(|op| match op {
            BackendOp::Delete(id) if id.kind == ResourceKind::Pod => Some(id.name),
            _ => None,
        })
        .collect();
    assert_eq!(deleted, vec!["db-2", "db-1"]);
    assert_eq!(pods_of(&backend, &db).len(), 1);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deleting_desired_tears_down_and_purges() {
    let (runtime, backend) = start();
    runtime.desired().apply(web(), web_spec(2, "nginx:1"), None).unwrap();
    assert!(runtime.wait_for_idle(IDLE).await);

    runtime.desired().delete(&web(), None).unwrap();
    assert!(runtime.wait_for_idle(IDLE).await);
    assert!(!backend.contains(&web()));
    assert!(pods_of(&backend, &web()).is_empty());
    assert!(!runtime.desired().contains(&web()));

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lost_delete_is_repaired_after_watch_reconnect() {
    let (runtime, backend) = start();
    runtime.desired().apply(web(), web_spec(2, "nginx:1"), None).unwrap();
    assert!(runtime.wait_for_idle(IDLE).await);

    let victim = pods_of(&backend, &web())[0].identity.clone();
    backend.disconnect_watchers(None);
    assert!(backend.remove_silently(&victim));

    assert!(eventually(|| pods_of(&backend, &web()).len() == 2).await);
    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stray_top_level_object_is_removed() {
    let (runtime, backend) = start();
    let stray = ResourceIdentity::new(ResourceKind::ConfigMap, "default", "leftover");
    backend.put(ResourceRecord::new(stray.clone(), json!({"data": {}})), false);

    assert!(eventually(|| !backend.contains(&stray)).await);
    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn persistent_backend_failure_degrades_then_recovers() {
    let (runtime, backend) = start();
    let cfg = ResourceIdentity::new(ResourceKind::ConfigMap, "default", "settings");
    backend.fail_kind(Some(ResourceKind::ConfigMap));
    runtime.desired().apply(cfg.clone(), json!({"data": {"a": "1"}}), None).unwrap();

    assert!(eventually(|| runtime.reconciler().is_degraded(&cfg)).await);
    assert_eq!(runtime.health_report().state, HealthState::Degraded);
    let status = runtime.desired().get(&cfg).unwrap().status;
    assert!(condition(&status, DEGRADED).unwrap().is_true());

    backend.fail_kind(None);
    assert!(eventually(|| backend.contains(&cfg) && !runtime.reconciler().is_degraded(&cfg)).await);
    assert!(runtime.wait_for_idle(IDLE).await);
    assert_eq!(runtime.health_report().state, HealthState::Healthy);
    let status = runtime.desired().get(&cfg).unwrap().status;
    assert!(!condition(&status, DEGRADED).unwrap().is_true());

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn garbage_collection_deletes_orphaned_records() {
    let (runtime, backend) = start();
    let owned = Manifest::parse_str(
        r#"
kind: ConfigMap
metadata:
  name: web-config
  ownerReferences:
    - kind: Deployment
      name: ghost
data:
  mode: fast
"#,
    )
    .unwrap();
    let record = runtime.apply_manifest(&owned[0]).unwrap();
    assert!(runtime.wait_for_idle(IDLE).await);
    assert!(backend.contains(&record.identity));

    assert_eq!(runtime.collect_garbage(), 1);
    assert!(runtime.wait_for_idle(IDLE).await);
    assert!(!runtime.desired().contains(&record.identity));
    assert!(!backend.contains(&record.identity));

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_stops_accepting_work() {
    let (runtime, _backend) = start();
    assert_eq!(runtime.shutdown().await, ShutdownResult::Complete);

    let health = runtime.health_report();
    assert_eq!(health.state, HealthState::Unhealthy);
    assert!(!health.ready);
    assert!(runtime.queue().is_shutting_down());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconcile_metrics_are_recorded() {
    let (runtime, _backend) = start();
    let cfg = ResourceIdentity::new(ResourceKind::ConfigMap, "default", "metered");
    runtime.desired().apply(cfg, json!({"data": {}}), None).unwrap();
    assert!(runtime.wait_for_idle(IDLE).await);

    let snapshot = runtime.metrics();
    let successes = snapshot.counter("reconcile_total{kind=ConfigMap,result=success}");
    assert!(successes >= 1, "snapshot: {:?}", snapshot);

    runtime.shutdown().await;
}
