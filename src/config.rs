//! Runtime configuration from environment variables and an optional TOML
//! file.
//!
//! Values come from `RECONCILE_*` environment variables with safe defaults;
//! invalid values fall back to defaults without crashing. A TOML file named
//! by `RECONCILE_CONFIG` (or `--config`) is then overlaid on top. Every
//! value is clamped to a usable range after both layers are applied.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `RECONCILE_WORKERS` | CPU count | Reconciler pool size (1..=64) |
//! | `RECONCILE_RESYNC_PERIOD` | 300 | Periodic full resync (secs) |
//! | `RECONCILE_BACKOFF_BASE_MS` | 5 | First retry delay |
//! | `RECONCILE_BACKOFF_MAX_SECS` | 300 | Retry delay cap |
//! | `RECONCILE_MAX_FAILURES` | 5 | Consecutive failures before Degraded |
//! | `RECONCILE_ROLLOUT_REQUEUE_MS` | 500 | Delay between plan batches |
//! | `RECONCILE_RELIST_BACKOFF_MS` | 1000 | Pause before re-watching |
//! | `RECONCILE_SHUTDOWN_TIMEOUT` | 30 | Drain timeout (secs) |
//! | `RECONCILE_LOG_FORMAT` | json | `json` or `pretty` |
//! | `RECONCILE_LOG_LEVEL` | info | `EnvFilter` directive |
//! | `RECONCILE_CONFIG` | unset | TOML file overlaid on the above |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::{ReconcilerConfig, RuntimeConfig, WatchConfig};
use crate::scheduler::BackoffConfig;
use crate::telemetry::{LogConfig, LogFormat};

pub const MAX_WORKERS: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub workers: usize,
    pub resync_period_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
    pub max_failures: u32,
    pub rollout_requeue_ms: u64,
    pub relist_backoff_ms: u64,
    pub shutdown_timeout_secs: u64,
    pub log_format: String,
    pub log_level: String,
    pub config_file: Option<String>,
}

/// Overlay read from a TOML file. Keys mirror the environment variables
/// without the prefix, in lower case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub workers: Option<usize>,
    pub resync_period: Option<u64>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_secs: Option<u64>,
    pub max_failures: Option<u32>,
    pub rollout_requeue_ms: Option<u64>,
    pub relist_backoff_ms: Option<u64>,
    pub shutdown_timeout: Option<u64>,
    pub log_format: Option<String>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }
}

/// All runtime configuration.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub workers: usize,
    pub resync_period: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_failures: u32,
    pub rollout_requeue: Duration,
    pub relist_backoff: Duration,
    pub shutdown_timeout: Duration,
    pub log: LogConfig,
    pub config_file: Option<PathBuf>,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn default_workers() -> usize {
    num_cpus::get().clamp(1, MAX_WORKERS)
}

fn parse_log_format(raw: Option<&str>) -> LogFormat {
    raw.and_then(|s| s.parse().ok()).unwrap_or_default()
}

fn load_log_config() -> LogConfig {
    let format = parse_log_format(std::env::var("RECONCILE_LOG_FORMAT").ok().as_deref());
    let level = std::env::var("RECONCILE_LOG_LEVEL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    LogConfig {
        format,
        level,
        output_path: None,
    }
}

/// Load configuration from environment variables only.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    EnvConfig {
        workers: parse_usize("RECONCILE_WORKERS", default_workers()),
        resync_period: Duration::from_secs(parse_u64("RECONCILE_RESYNC_PERIOD", 300)),
        backoff_base: Duration::from_millis(parse_u64("RECONCILE_BACKOFF_BASE_MS", 5)),
        backoff_max: Duration::from_secs(parse_u64("RECONCILE_BACKOFF_MAX_SECS", 300)),
        max_failures: parse_u32("RECONCILE_MAX_FAILURES", 5),
        rollout_requeue: Duration::from_millis(parse_u64("RECONCILE_ROLLOUT_REQUEUE_MS", 500)),
        relist_backoff: Duration::from_millis(parse_u64("RECONCILE_RELIST_BACKOFF_MS", 1000)),
        shutdown_timeout: Duration::from_secs(parse_u64("RECONCILE_SHUTDOWN_TIMEOUT", 30)),
        log: load_log_config(),
        config_file: None,
    }
    .clamped()
}

/// Load environment configuration, then overlay the TOML file at `path`,
/// or at `RECONCILE_CONFIG` when `path` is `None`.
pub fn load_with_file(path: Option<&Path>) -> Result<EnvConfig, ConfigError> {
    let env_path = std::env::var_os("RECONCILE_CONFIG").map(PathBuf::from);
    let path = path.map(Path::to_path_buf).or(env_path);
    let mut cfg = load();
    if let Some(path) = path {
        let file = FileConfig::read(&path)?;
        cfg = cfg.overlay(&file);
        cfg.config_file = Some(path);
    }
    Ok(cfg.clamped())
}

impl EnvConfig {
    /// Apply file values on top of this configuration.
    pub fn overlay(mut self, file: &FileConfig) -> Self {
        if let Some(v) = file.workers {
            self.workers = v;
        }
        if let Some(v) = file.resync_period {
            self.resync_period = Duration::from_secs(v);
        }
        if let Some(v) = file.backoff_base_ms {
            self.backoff_base = Duration::from_millis(v);
        }
        if let Some(v) = file.backoff_max_secs {
            self.backoff_max = Duration::from_secs(v);
        }
        if let Some(v) = file.max_failures {
            self.max_failures = v;
        }
        if let Some(v) = file.rollout_requeue_ms {
            self.rollout_requeue = Duration::from_millis(v);
        }
        if let Some(v) = file.relist_backoff_ms {
            self.relist_backoff = Duration::from_millis(v);
        }
        if let Some(v) = file.shutdown_timeout {
            self.shutdown_timeout = Duration::from_secs(v);
        }
        if let Some(v) = &file.log_format {
            self.log.format = parse_log_format(Some(v));
        }
        if let Some(v) = file.log_level.as_ref().filter(|s| !s.trim().is_empty()) {
            self.log.level = v.clone();
        }
        self
    }

    fn clamped(mut self) -> Self {
        self.workers = self.workers.clamp(1, MAX_WORKERS);
        self.resync_period = self.resync_period.max(Duration::from_secs(1));
        self.backoff_base = self.backoff_base.max(Duration::from_millis(1));
        self.backoff_max = self.backoff_max.max(Duration::from_secs(1));
        self.max_failures = self.max_failures.max(1);
        self.shutdown_timeout = self.shutdown_timeout.max(Duration::from_secs(1));
        self
    }

    /// Inconsistent but loadable settings, one message each.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.backoff_base > self.backoff_max {
            out.push(format!(
                "RECONCILE_BACKOFF_BASE_MS ({}) exceeds RECONCILE_BACKOFF_MAX_SECS ({}s); every retry waits the cap",
                self.backoff_base.as_millis(),
                self.backoff_max.as_secs()
            ));
        }
        if self.rollout_requeue > self.resync_period {
            out.push(format!(
                "RECONCILE_ROLLOUT_REQUEUE_MS ({}) is longer than RECONCILE_RESYNC_PERIOD ({}s)",
                self.rollout_requeue.as_millis(),
                self.resync_period.as_secs()
            ));
        }
        out
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            workers: self.workers,
            resync_period: self.resync_period,
            shutdown_timeout: self.shutdown_timeout,
            backoff: BackoffConfig {
                base: self.backoff_base,
                max: self.backoff_max,
                ..BackoffConfig::default()
            },
            reconciler: ReconcilerConfig {
                max_failures: self.max_failures,
                rollout_requeue: self.rollout_requeue,
            },
            watch: WatchConfig {
                relist_backoff: self.relist_backoff,
            },
            ..RuntimeConfig::default()
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            workers: self.workers,
            resync_period_secs: self.resync_period.as_secs(),
            backoff_base_ms: self.backoff_base.as_millis() as u64,
            backoff_max_secs: self.backoff_max.as_secs(),
            max_failures: self.max_failures,
            rollout_requeue_ms: self.rollout_requeue.as_millis() as u64,
            relist_backoff_ms: self.relist_backoff.as_millis() as u64,
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            log_format: self.log.format.as_str().to_string(),
            log_level: self.log.level.clone(),
            config_file: self.config_file.as_ref().map(|p| p.display().to_string()),
        }
    }
}
