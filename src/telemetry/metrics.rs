//! Controller metrics, published through the `metrics` facade and mirrored
//! into a process-wide [`MetricsStore`].

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

use super::store::{series_key, MetricsSnapshot, MetricsStore};
use crate::model::ResourceKind;

fn store() -> &'static MetricsStore {
    static STORE: OnceLock<MetricsStore> = OnceLock::new();
    STORE.get_or_init(MetricsStore::new)
}

/// Register descriptions with the installed recorder.
pub fn init_metrics() {
    describe_counter!("reconcile_total", "Reconciliation passes by kind and result");
    describe_counter!("watch_events_total", "Watch events received by kind and type");
    describe_counter!(
        "watch_stale_events_total",
        "Watch events discarded as older than the cached version"
    );
    describe_counter!("relist_total", "Full relists performed per kind");
    describe_gauge!("workqueue_depth", "Identities waiting in the work queue");
    describe_gauge!("degraded_resources", "Identities currently marked Degraded");
    describe_histogram!(
        "reconcile_duration_seconds",
        Unit::Seconds,
        "Wall time of one reconciliation pass"
    );
}

/// Outcome label for `reconcile_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    Success,
    Requeue,
    Rejected,
    Error,
}

impl ReconcileResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Requeue => "requeue",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }
}

pub fn record_reconcile(kind: ResourceKind, result: ReconcileResult, elapsed: Duration) {
    let kind = kind.as_str();
    let result = result.as_str();
    counter!("reconcile_total", "kind" => kind, "result" => result).increment(1);
    histogram!("reconcile_duration_seconds", "kind" => kind).record(elapsed.as_secs_f64());

    store().increment_counter(
        &series_key("reconcile_total", &[("kind", kind), ("result", result)]),
        1,
    );
    store().record_histogram(
        &series_key("reconcile_duration_seconds", &[("kind", kind)]),
        elapsed.as_secs_f64(),
    );
}

pub fn record_watch_event(kind: ResourceKind, event_type: &'static str) {
    let kind = kind.as_str();
    counter!("watch_events_total", "kind" => kind, "type" => event_type).increment(1);
    store().increment_counter(
        &series_key("watch_events_total", &[("kind", kind), ("type", event_type)]),
        1,
    );
}

pub fn record_stale_event(kind: ResourceKind) {
    let kind = kind.as_str();
    counter!("watch_stale_events_total", "kind" => kind).increment(1);
    store().increment_counter(&series_key("watch_stale_events_total", &[("kind", kind)]), 1);
}

pub fn record_relist(kind: ResourceKind) {
    let kind = kind.as_str();
    counter!("relist_total", "kind" => kind).increment(1);
    store().increment_counter(&series_key("relist_total", &[("kind", kind)]), 1);
}

pub fn record_queue_depth(depth: usize) {
    gauge!("workqueue_depth").set(depth as f64);
    store().set_gauge("workqueue_depth", depth as f64);
}

pub fn record_degraded(count: usize) {
    gauge!("degraded_resources").set(count as f64);
    store().set_gauge("degraded_resources", count as f64);
}

/// Current values of every series recorded in this process.
pub fn snapshot() -> MetricsSnapshot {
    store().snapshot()
}
