//! Per-kind watch consumers and trigger routing.
//!
//! One consumer per kind is the only writer of that kind's cache entries.
//! It opens the watch before listing so nothing that changes between the
//! two is lost, applies the listing as a relist, then follows the stream.
//! A closed stream means the connection dropped: pause, then watch and
//! relist again. Objects deleted during the outage fall out of the relist
//! and are reported as removed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{StateBackend, WatchStream};
use crate::cache::{EventOutcome, ObservedCache, Trigger};
use crate::model::{ResourceIdentity, ResourceKind};
use crate::plan::pods::RETAINED_BY;
use crate::scheduler::WorkQueue;
use crate::store::DesiredStateStore;
use crate::telemetry;

use super::status::service_selector;

/// Maps an observed change to the identities whose plans depend on it.
pub struct TriggerRouter {
    desired: Arc<DesiredStateStore>,
    queue: Arc<WorkQueue>,
}

impl TriggerRouter {
    pub fn new(desired: Arc<DesiredStateStore>, queue: Arc<WorkQueue>) -> Self {
        Self { desired, queue }
    }

    /// Identities to reconcile for a change to `trigger.identity`.
    ///
    /// An owned child enqueues its owners rather than itself. Pods also
    /// enqueue the Services selecting them; Nodes enqueue every DaemonSet;
    /// retained claims enqueue their StatefulSet.
    pub fn targets(&self, trigger: &Trigger) -> Vec<ResourceIdentity> {
        let identity = &trigger.identity;
        let mut out = Vec::new();

        if !trigger.owners.is_empty() {
            out.extend(trigger.owners.iter().cloned());
        } else if !identity.kind.is_observed_only() {
            out.push(identity.clone());
        }

        match identity.kind {
            ResourceKind::Pod => {
                out.extend(
                    self.desired
                        .list(ResourceKind::Service)
                        .into_iter()
                        .filter(|svc| svc.namespace() == identity.namespace)
                        .filter(|svc| {
                            let selector = service_selector(svc);
                            !selector.is_empty() && selector.matches(&trigger.labels)
                        })
                        .map(|svc| svc.identity),
                );
            }
            ResourceKind::Node => {
                out.extend(
                    self.desired
                        .list(ResourceKind::DaemonSet)
                        .into_iter()
                        .map(|ds| ds.identity),
                );
            }
            ResourceKind::PersistentVolumeClaim => {
                if let Some(set) = trigger.labels.get(RETAINED_BY) {
                    out.push(identity.sibling(ResourceKind::StatefulSet, set.clone()));
                }
            }
            _ => {}
        }
        out
    }

    pub fn route(&self, trigger: &Trigger) {
        for target in self.targets(trigger) {
            self.queue.add(target);
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Pause before re-opening a dropped or failed watch.
    pub relist_backoff: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            relist_backoff: Duration::from_millis(1000),
        }
    }
}

/// Shared pieces every watch consumer needs.
#[derive(Clone)]
pub struct WatchContext {
    pub backend: Arc<dyn StateBackend>,
    pub cache: Arc<ObservedCache>,
    pub router: Arc<TriggerRouter>,
    pub config: WatchConfig,
}

/// Spawn the consumer for `kind`. Returns a handle for shutdown.
pub fn spawn_watch(
    kind: ResourceKind,
    ctx: WatchContext,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        watch_loop(kind, &ctx, shutdown).await;
    })
}

async fn watch_loop(kind: ResourceKind, ctx: &WatchContext, shutdown: CancellationToken) {
    let mut first = true;
    loop {
        if !first && !pause(ctx.config.relist_backoff, &shutdown).await {
            break;
        }
        first = false;

        let stream = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            stream = ctx.backend.watch(kind) => stream,
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Watch failed to open");
                continue;
            }
        };

        if let Err(e) = relist(kind, ctx).await {
            warn!(kind = %kind, error = %e, "Relist failed");
            continue;
        }

        if !follow(kind, ctx, stream, &shutdown).await {
            break;
        }
        warn!(kind = %kind, "Watch stream closed, relisting");
    }
    debug!(kind = %kind, "watch: shutdown signal received");
}

async fn relist(kind: ResourceKind, ctx: &WatchContext) -> Result<(), crate::backend::BackendError> {
    let records = ctx.backend.list(kind).await?;
    let count = records.len();
    let triggers = ctx.cache.relist(kind, records);
    telemetry::record_relist(kind);
    info!(kind = %kind, objects = count, changed = triggers.len(), "Relisted");
    for trigger in &triggers {
        ctx.router.route(trigger);
    }
    Ok(())
}

/// Apply events until the stream ends. Returns false on shutdown.
async fn follow(
    kind: ResourceKind,
    ctx: &WatchContext,
    mut stream: WatchStream,
    shutdown: &CancellationToken,
) -> bool {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => return false,
            event = stream.recv() => event,
        };
        let Some(event) = event else {
            return true;
        };
        telemetry::record_watch_event(kind, event.event_type().as_str());
        match ctx.cache.apply_event(event) {
            EventOutcome::Applied(trigger) => ctx.router.route(&trigger),
            EventOutcome::Stale(identity) => {
                debug!(resource = %identity, "Discarded stale watch event");
                telemetry::record_stale_event(kind);
            }
            EventOutcome::Bookmark(_) => {}
        }
    }
}

/// Sleep unless cancelled first. Returns false when cancelled.
async fn pause(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
