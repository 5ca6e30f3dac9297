//! Per-identity exponential retry delays.

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;

use crate::model::ResourceIdentity;

/// Backoff tuning.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
    /// Fraction of the delay that may be shaved off at random (0.0..=1.0).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(5),
            max: Duration::from_secs(300),
            jitter: 0.1,
        }
    }
}

/// Tracks consecutive failures per identity.
pub struct Backoff {
    config: BackoffConfig,
    failures: DashMap<ResourceIdentity, u32>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn next_delay(&self, identity: &ResourceIdentity) -> Duration {
        let attempt = {
            let mut entry = self.failures.entry(identity.clone()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };
        self.jittered(self.delay_for(attempt))
    }

    /// Undithered delay for the `attempt`-th consecutive failure (1-based):
    /// `base * 2^(attempt-1)`, capped at `max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.config
            .base
            .checked_mul(1u32 << exp)
            .map_or(self.config.max, |d| d.min(self.config.max))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let cut = rand::thread_rng().gen_range(0.0..=jitter);
        delay.mul_f64(1.0 - cut)
    }

    /// Clear the failure count after a successful pass.
    pub fn forget(&self, identity: &ResourceIdentity) {
        self.failures.remove(identity);
    }

    pub fn failures(&self, identity: &ResourceIdentity) -> u32 {
        self.failures.get(identity).map_or(0, |f| *f)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
