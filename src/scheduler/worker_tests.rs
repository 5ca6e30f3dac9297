//! Tests for the worker dequeue-reconcile loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::backend::{InMemoryBackend, StateBackend};
use crate::cache::ObservedCache;
use crate::controller::ReconcilerConfig;
use crate::model::ResourceKind;
use crate::scheduler::BackoffConfig;
use crate::store::DesiredStateStore;

struct Setup {
    desired: Arc<DesiredStateStore>,
    backend: Arc<InMemoryBackend>,
    ctx: WorkerContext,
}

fn setup() -> Setup {
    let desired = Arc::new(DesiredStateStore::new());
    let cache = Arc::new(ObservedCache::new());
    let backend = Arc::new(InMemoryBackend::new());
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&desired),
        cache,
        backend.clone() as Arc<dyn StateBackend>,
        ReconcilerConfig {
            max_failures: 2,
            rollout_requeue: Duration::from_millis(10),
        },
    ));
    let ctx = WorkerContext {
        queue: Arc::new(WorkQueue::new()),
        reconciler,
        backoff: Arc::new(Backoff::new(BackoffConfig {
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
            jitter: 0.0,
        })),
        shutdown: Arc::new(ShutdownCoordinator::new()),
    };
    Setup {
        desired,
        backend,
        ctx,
    }
}

fn cfg() -> ResourceIdentity {
    ResourceIdentity::new(ResourceKind::ConfigMap, "default", "cfg")
}

async fn eventually(cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn worker_reconciles_enqueued_identity() {
    let s = setup();
    s.desired.apply(cfg(), json!({"data": {"k": "v"}}), None).unwrap();
    let token = CancellationToken::new();
    let worker = spawn_worker(0, s.ctx.clone(), token.clone());

    s.ctx.queue.add(cfg());
    eventually(|| s.backend.contains(&cfg())).await;

    token.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), worker).await;
}

#[tokio::test]
async fn worker_retries_with_backoff_until_success() {
    let s = setup();
    s.desired.apply(cfg(), json!({"data": {"k": "v"}}), None).unwrap();
    s.backend.fail_next_writes(3);
    let token = CancellationToken::new();
    let workers = spawn_workers(2, s.ctx.clone(), token.clone());

    s.ctx.queue.add(cfg());
    eventually(|| s.backend.contains(&cfg())).await;
    eventually(|| s.ctx.backoff.failures(&cfg()) == 0).await;
    // Three failures crossed the threshold; the success cleared it.
    eventually(|| !s.ctx.reconciler.is_degraded(&cfg())).await;

    token.cancel();
    for w in workers {
        let _ = tokio::time::timeout(Duration::from_secs(1), w).await;
    }
}

#[tokio::test]
async fn persistent_failure_marks_degraded_and_keeps_retrying() {
    let s = setup();
    s.desired.apply(cfg(), json!({"data": {"k": "v"}}), None).unwrap();
    s.backend.fail_kind(Some(ResourceKind::ConfigMap));
    let token = CancellationToken::new();
    let worker = spawn_worker(0, s.ctx.clone(), token.clone());

    s.ctx.queue.add(cfg());
    eventually(|| s.ctx.reconciler.is_degraded(&cfg())).await;
    let seen = s.ctx.backoff.failures(&cfg());
    eventually(|| s.ctx.backoff.failures(&cfg()) > seen).await;

    s.backend.fail_kind(None);
    eventually(|| s.backend.contains(&cfg())).await;
    eventually(|| !s.ctx.reconciler.is_degraded(&cfg())).await;

    token.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), worker).await;
}

#[tokio::test]
async fn worker_stops_on_cancel() {
    let s = setup();
    let token = CancellationToken::new();
    let worker = spawn_worker(0, s.ctx.clone(), token.clone());
    token.cancel();
    let joined = tokio::time::timeout(Duration::from_secs(1), worker).await;
    assert!(joined.is_ok());
}
