//! Runtime wiring: stores, cache, queue, workers, watch consumers and the
//! periodic resync/GC loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reconciler::{Reconciler, ReconcilerConfig};
use super::watch::{spawn_watch, TriggerRouter, WatchConfig, WatchContext};
use crate::backend::StateBackend;
use crate::cache::ObservedCache;
use crate::health::{HealthChecker, HealthConfig, HealthInputs, HealthReport};
use crate::model::{Manifest, ResourceKind, ResourceRecord};
use crate::plan::is_top_level;
use crate::scheduler::{spawn_workers, Backoff, BackoffConfig, WorkQueue, WorkerContext};
use crate::shutdown::{ShutdownCoordinator, ShutdownResult};
use crate::store::{DesiredEvent, DesiredStateStore, StoreError};
use crate::telemetry::{self, MetricsSnapshot};

/// How long the queue must stay idle before `wait_for_idle` reports it.
const IDLE_SETTLE: Duration = Duration::from_millis(50);

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub workers: usize,
    pub resync_period: Duration,
    pub shutdown_timeout: Duration,
    pub backoff: BackoffConfig,
    pub reconciler: ReconcilerConfig,
    pub watch: WatchConfig,
    pub health: HealthConfig,
    /// Kinds to run watch consumers for.
    pub watched_kinds: Vec<ResourceKind>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().clamp(1, 64),
            resync_period: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
            reconciler: ReconcilerConfig::default(),
            watch: WatchConfig::default(),
            health: HealthConfig::default(),
            watched_kinds: ResourceKind::ALL.to_vec(),
        }
    }
}

/// The running controller.
pub struct ControllerRuntime {
    config: RuntimeConfig,
    desired: Arc<DesiredStateStore>,
    cache: Arc<ObservedCache>,
    backend: Arc<dyn StateBackend>,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    backoff: Arc<Backoff>,
    router: Arc<TriggerRouter>,
    shutdown: Arc<ShutdownCoordinator>,
    health: HealthChecker,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ControllerRuntime {
    /// Create a runtime with an empty desired store.
    pub fn new(config: RuntimeConfig, backend: Arc<dyn StateBackend>) -> Self {
        Self::with_store(config, Arc::new(DesiredStateStore::new()), backend)
    }

    pub fn with_store(
        config: RuntimeConfig,
        desired: Arc<DesiredStateStore>,
        backend: Arc<dyn StateBackend>,
    ) -> Self {
        let cache = Arc::new(ObservedCache::new());
        let queue = Arc::new(WorkQueue::new());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&desired),
            Arc::clone(&cache),
            Arc::clone(&backend),
            config.reconciler.clone(),
        ));
        let router = Arc::new(TriggerRouter::new(Arc::clone(&desired), Arc::clone(&queue)));
        Self {
            backoff: Arc::new(Backoff::new(config.backoff.clone())),
            health: HealthChecker::new(config.health.clone()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            tasks: Mutex::new(Vec::new()),
            config,
            desired,
            cache,
            backend,
            queue,
            reconciler,
            router,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn desired(&self) -> &Arc<DesiredStateStore> {
        &self.desired
    }

    pub fn cache(&self) -> &Arc<ObservedCache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Spawn watch consumers, workers, the desired-store forwarder and the
    /// resync loop. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let token = self.shutdown.token();
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        telemetry::init_metrics();

        // Subscribe before anything can publish.
        let events = self.desired.subscribe();
        tasks.push(self.spawn_forwarder(events, token.clone()));

        let ctx = WatchContext {
            backend: Arc::clone(&self.backend),
            cache: Arc::clone(&self.cache),
            router: Arc::clone(&self.router),
            config: self.config.watch.clone(),
        };
        for kind in &self.config.watched_kinds {
            tasks.push(spawn_watch(*kind, ctx.clone(), token.clone()));
        }

        let worker_ctx = WorkerContext {
            queue: Arc::clone(&self.queue),
            reconciler: Arc::clone(&self.reconciler),
            backoff: Arc::clone(&self.backoff),
            shutdown: Arc::clone(&self.shutdown),
        };
        tasks.extend(spawn_workers(self.config.workers, worker_ctx, token.clone()));
        tasks.push(self.spawn_resync(token));

        // Whatever was applied before start.
        self.resync();
        info!(
            workers = self.config.workers,
            kinds = self.config.watched_kinds.len(),
            "Controller runtime started"
        );
    }

    fn spawn_forwarder(
        &self,
        mut events: tokio::sync::broadcast::Receiver<DesiredEvent>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let desired = Arc::clone(&self.desired);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => queue.add(event.identity().clone()),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Desired-state events dropped, resyncing");
                        for identity in desired.identities() {
                            queue.add(identity);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("forwarder: shutdown signal received");
        })
    }

    fn spawn_resync(&self, token: CancellationToken) -> JoinHandle<()> {
        let period = self.config.resync_period.max(Duration::from_secs(1));
        let desired = Arc::clone(&self.desired);
        let cache = Arc::clone(&self.cache);
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        collect_garbage(&desired);
                        let queued = enqueue_all(&desired, &cache, &queue);
                        debug!(queued, "Periodic resync");
                    }
                }
            }
        })
    }

    /// Validate and store a manifest. Reconciliation follows through the
    /// desired-store event stream.
    pub fn apply_manifest(&self, manifest: &Manifest) -> Result<ResourceRecord, StoreError> {
        self.desired.apply_manifest(manifest, None)
    }

    /// Enqueue every desired identity and every top-level observed object.
    /// Returns how many identities were enqueued.
    pub fn resync(&self) -> usize {
        enqueue_all(&self.desired, &self.cache, &self.queue)
    }

    /// Delete desired records whose owners are all gone. Returns how many
    /// deletions were requested.
    pub fn collect_garbage(&self) -> usize {
        collect_garbage(&self.desired)
    }

    /// Wait until nothing is queued, running or scheduled for
    /// `IDLE_SETTLE`. Returns false on timeout.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut idle_since: Option<tokio::time::Instant> = None;
        loop {
            let now = tokio::time::Instant::now();
            if self.queue.is_idle() {
                let since = *idle_since.get_or_insert(now);
                if now.duration_since(since) >= IDLE_SETTLE {
                    return true;
                }
            } else {
                idle_since = None;
            }
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn health_report(&self) -> HealthReport {
        let synced = self
            .config
            .watched_kinds
            .iter()
            .filter(|k| self.cache.has_synced(**k))
            .count();
        self.health.report(&HealthInputs {
            shutdown_state: self.shutdown.state(),
            queue_depth: self.queue.len(),
            in_flight: self.shutdown.in_flight_count(),
            degraded_resources: self.reconciler.degraded_count(),
            synced_kinds: synced,
            watched_kinds: self.config.watched_kinds.len(),
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        telemetry::metrics_snapshot()
    }

    /// Stop watch consumers and workers. In-flight reconciliations finish
    /// their current backend call; queued work is dropped and picked up by
    /// the next process from persisted state.
    pub async fn shutdown(&self) -> ShutdownResult {
        info!("Controller runtime shutting down");
        let result = self.shutdown.initiate(self.config.shutdown_timeout).await;
        self.queue.shutdown();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
                warn!("Task did not stop in time");
            }
        }
        match &result {
            ShutdownResult::Complete => info!("Shutdown complete"),
            ShutdownResult::Timeout { remaining } => {
                warn!(remaining, "Shutdown timed out with reconciliations in flight")
            }
        }
        result
    }
}

fn enqueue_all(desired: &DesiredStateStore, cache: &ObservedCache, queue: &WorkQueue) -> usize {
    let mut count = 0;
    for identity in desired.identities() {
        queue.add(identity);
        count += 1;
    }
    for identity in cache.identities() {
        let top_level = cache.get(&identity).is_some_and(|r| is_top_level(&r));
        if top_level && !desired.contains(&identity) {
            queue.add(identity);
            count += 1;
        }
    }
    count
}

fn collect_garbage(desired: &DesiredStateStore) -> usize {
    let mut count = 0;
    for identity in desired.orphans() {
        match desired.delete(&identity, None) {
            Ok(()) => {
                info!(resource = %identity, "Deleting orphaned desired record");
                count += 1;
            }
            Err(e) => debug!(resource = %identity, error = %e, "Orphan already gone"),
        }
    }
    count
}
