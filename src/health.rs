//! Liveness, readiness and a full health report for the controller.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::shutdown::ShutdownState;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Point-in-time inputs gathered from the runtime.
#[derive(Debug, Clone, Copy)]
pub struct HealthInputs {
    pub shutdown_state: ShutdownState,
    pub queue_depth: usize,
    pub in_flight: u32,
    pub degraded_resources: usize,
    pub synced_kinds: usize,
    pub watched_kinds: usize,
}

/// Detailed health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_work: bool,
    pub queue_depth: usize,
    pub in_flight: u32,
    pub degraded_resources: usize,
    pub synced_kinds: usize,
    pub watched_kinds: usize,
    pub uptime_secs: u64,
}

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Queue depth at or above which the controller reports Degraded and
    /// not ready.
    pub max_queue_depth: usize,
    /// Readiness waits for every watched kind to complete its first list.
    pub require_synced: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 10_000,
            require_synced: true,
        }
    }
}

pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    /// Check liveness: process is responsive.
    pub fn is_alive(&self) -> bool {
        true
    }

    pub fn is_ready(&self, inputs: &HealthInputs) -> bool {
        if inputs.shutdown_state != ShutdownState::Running {
            return false;
        }
        if self.config.require_synced && inputs.synced_kinds < inputs.watched_kinds {
            return false;
        }
        inputs.queue_depth < self.config.max_queue_depth
    }

    pub fn report(&self, inputs: &HealthInputs) -> HealthReport {
        HealthReport {
            state: self.compute_state(inputs),
            ready: self.is_ready(inputs),
            accepting_work: inputs.shutdown_state == ShutdownState::Running,
            queue_depth: inputs.queue_depth,
            in_flight: inputs.in_flight,
            degraded_resources: inputs.degraded_resources,
            synced_kinds: inputs.synced_kinds,
            watched_kinds: inputs.watched_kinds,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(&self, inputs: &HealthInputs) -> HealthState {
        if inputs.shutdown_state != ShutdownState::Running {
            return HealthState::Unhealthy;
        }
        if inputs.degraded_resources > 0 || inputs.queue_depth >= self.config.max_queue_depth {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
