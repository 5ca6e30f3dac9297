//! Reconciler worker pool: dequeue an identity, run one pass, requeue.
//!
//! The queue guarantees a worker has exclusive hold of an identity between
//! `get` and `done`, so `done` is always called last: any `add_after`
//! issued here lands while the identity is still held and is kept.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use super::backoff::Backoff;
use super::queue::WorkQueue;
use crate::controller::{ReconcileOutcome, Reconciler};
use crate::model::ResourceIdentity;
use crate::shutdown::ShutdownCoordinator;
use crate::telemetry::{self, ReconcileResult, ReconcileSpan, SpanExt};

/// Everything a worker needs, cheap to clone per worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<WorkQueue>,
    pub reconciler: Arc<Reconciler>,
    pub backoff: Arc<Backoff>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

/// Spawn `count` workers. Returns handles for shutdown.
pub fn spawn_workers(
    count: usize,
    ctx: WorkerContext,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|id| spawn_worker(id, ctx.clone(), shutdown.clone()))
        .collect()
}

/// Spawn one worker loop.
pub fn spawn_worker(id: usize, ctx: WorkerContext, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        worker_loop(id, &ctx, shutdown).await;
    })
}

async fn worker_loop(id: usize, ctx: &WorkerContext, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::info!(worker = id, "worker: shutdown signal received");
                break;
            }
            item = ctx.queue.get() => {
                match item {
                    Some(identity) => process(ctx, identity).await,
                    None => break,
                }
            }
        }
    }
}

async fn process(ctx: &WorkerContext, identity: ResourceIdentity) {
    let Some(_guard) = ctx.shutdown.track() else {
        ctx.queue.done(&identity);
        return;
    };

    let attempt = ctx.backoff.failures(&identity) + 1;
    let span = ReconcileSpan::new(&identity, attempt);
    let start = Instant::now();
    let result = ctx
        .reconciler
        .reconcile(&identity)
        .instrument(span.clone())
        .await;
    span.record_result(&result);
    let elapsed = start.elapsed();

    let label = match &result {
        Ok(outcome) => {
            ctx.backoff.forget(&identity);
            ctx.reconciler.record_success(&identity);
            match outcome {
                ReconcileOutcome::Progressing { executed, remaining } => {
                    span.record("actions", *executed as u64);
                    debug!(resource = %identity, remaining, "Requeueing to continue plan");
                    ctx.queue
                        .add_after(identity.clone(), ctx.reconciler.config().rollout_requeue);
                    ReconcileResult::Requeue
                }
                ReconcileOutcome::Rejected(_) => ReconcileResult::Rejected,
                ReconcileOutcome::Converged | ReconcileOutcome::Finalized => {
                    ReconcileResult::Success
                }
            }
        }
        Err(err) => {
            let delay = ctx.backoff.next_delay(&identity);
            let failures = ctx.backoff.failures(&identity);
            ctx.reconciler.record_failure(&identity, err, failures);
            if err.is_retryable() {
                warn!(
                    resource = %identity,
                    failures,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "Reconcile failed, retrying"
                );
                ctx.queue.add_after(identity.clone(), delay);
            } else {
                warn!(resource = %identity, error = %err, "Reconcile failed, waiting for a new trigger");
            }
            ReconcileResult::Error
        }
    };

    telemetry::record_reconcile(identity.kind, label, elapsed);
    ctx.queue.done(&identity);
    telemetry::record_queue_depth(ctx.queue.len());
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
