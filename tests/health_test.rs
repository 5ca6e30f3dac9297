//! Health check tests.

use reconcile_core::health::{HealthChecker, HealthConfig, HealthInputs, HealthState};
use reconcile_core::shutdown::ShutdownState;

fn inputs() -> HealthInputs {
    HealthInputs {
        shutdown_state: ShutdownState::Running,
        queue_depth: 0,
        in_flight: 0,
        degraded_resources: 0,
        synced_kinds: 4,
        watched_kinds: 4,
    }
}

#[test]
fn test_alive_always_true() {
    let checker = HealthChecker::default();
    assert!(checker.is_alive());
}

#[test]
fn test_ready_when_running_and_synced() {
    let checker = HealthChecker::default();
    assert!(checker.is_ready(&inputs()));
}

#[test]
fn test_not_ready_when_draining_or_stopped() {
    let checker = HealthChecker::default();
    for state in [ShutdownState::Draining, ShutdownState::Stopped] {
        let i = HealthInputs {
            shutdown_state: state,
            ..inputs()
        };
        assert!(!checker.is_ready(&i));
        let report = checker.report(&i);
        assert_eq!(report.state, HealthState::Unhealthy);
        assert!(!report.accepting_work);
    }
}

#[test]
fn test_not_ready_until_every_kind_synced() {
    let checker = HealthChecker::default();
    let i = HealthInputs {
        synced_kinds: 3,
        ..inputs()
    };
    assert!(!checker.is_ready(&i));

    let relaxed = HealthChecker::new(HealthConfig {
        require_synced: false,
        ..HealthConfig::default()
    });
    assert!(relaxed.is_ready(&i));
}

#[test]
fn test_degraded_resources_degrade_but_stay_ready() {
    let checker = HealthChecker::default();
    let i = HealthInputs {
        degraded_resources: 2,
        ..inputs()
    };
    let report = checker.report(&i);
    assert_eq!(report.state, HealthState::Degraded);
    assert!(report.ready);
    assert_eq!(report.degraded_resources, 2);
}

#[test]
fn test_queue_backlog_degrades_and_blocks_readiness() {
    let checker = HealthChecker::new(HealthConfig {
        max_queue_depth: 10,
        ..HealthConfig::default()
    });
    let i = HealthInputs {
        queue_depth: 10,
        ..inputs()
    };
    let report = checker.report(&i);
    assert_eq!(report.state, HealthState::Degraded);
    assert!(!report.ready);
}

#[test]
fn test_report_serializes() {
    let report = HealthChecker::default().report(&inputs());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["state"], "Healthy");
    assert_eq!(json["ready"], true);
}
