//! Telemetry: structured logging, reconcile spans and metrics.
//!
//! No exporter is installed here; the `metrics` facade is a no-op until the
//! embedding binary installs a recorder.

mod logging;
mod metrics;
mod spans;
mod store;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    init_metrics, record_degraded, record_queue_depth, record_reconcile, record_relist,
    record_stale_event, record_watch_event, snapshot as metrics_snapshot, ReconcileResult,
};
pub use spans::{ReconcileSpan, SpanExt};
pub use store::{series_key, HistogramSummary, MetricsSnapshot, MetricsStore};
