//! Telemetry tests: log configuration and the in-process metrics store.

use std::time::Duration;

use reconcile_core::model::{ResourceIdentity, ResourceKind};
use reconcile_core::telemetry::{
    init_metrics, metrics_snapshot, record_queue_depth, record_reconcile, series_key, LogConfig,
    LogFormat, MetricsStore, ReconcileResult, ReconcileSpan, SpanExt,
};

// =============================================================================
// LogConfig Tests
// =============================================================================

#[test]
fn log_config_defaults_to_json_info_stderr() {
    let config = LogConfig::default();
    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, "info");
    assert!(config.output_path.is_none());
}

#[test]
fn log_format_names_round_trip() {
    for format in [LogFormat::Json, LogFormat::Pretty] {
        assert_eq!(format.as_str().parse::<LogFormat>().unwrap(), format);
    }
}

// =============================================================================
// Metrics Tests
// =============================================================================

#[test]
fn store_accumulates_counters_and_histograms() {
    let store = MetricsStore::new();
    let key = series_key("reconcile_total", &[("kind", "Pod"), ("result", "error")]);
    store.increment_counter(&key, 2);
    store.increment_counter(&key, 3);
    store.record_histogram("latency", 0.5);
    store.record_histogram("latency", 1.5);

    let snapshot = store.snapshot();
    assert_eq!(snapshot.counter("reconcile_total{kind=Pod,result=error}"), 5);
    let latency = &snapshot.histograms["latency"];
    assert_eq!(latency.count, 2);
    assert_eq!(latency.min, 0.5);
    assert_eq!(latency.max, 1.5);
}

#[test]
fn recorders_feed_the_process_snapshot() {
    init_metrics();
    let key = "reconcile_total{kind=Secret,result=rejected}";
    let before = metrics_snapshot().counter(key);
    record_reconcile(
        ResourceKind::Secret,
        ReconcileResult::Rejected,
        Duration::from_millis(3),
    );
    record_queue_depth(7);

    let after = metrics_snapshot();
    assert_eq!(after.counter(key), before + 1);
    assert!(after.gauge("workqueue_depth").is_some());
}

#[test]
fn reconcile_span_records_result() {
    let identity = ResourceIdentity::new(ResourceKind::Deployment, "default", "web");
    let span = ReconcileSpan::new(&identity, 1);
    let ok: Result<(), String> = Ok(());
    span.record_result(&ok);
    let err: Result<(), String> = Err("backend unavailable".to_string());
    span.record_result(&err);
}
