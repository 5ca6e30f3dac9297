// Copyright 2024-2026 reconcile-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration from the environment and the optional
//! TOML overlay without starting the controller.

use std::path::Path;

use crate::config::{self, EffectiveConfig};

/// Print effective config as key-value pairs to stdout.
pub fn run_show(file: Option<&Path>) -> i32 {
    match config::load_with_file(file) {
        Ok(cfg) => {
            print_config(&cfg.effective_config());
            0
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            1
        }
    }
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    println!("RECONCILE_WORKERS=<cpu count, 1..={}>", config::MAX_WORKERS);
    println!("RECONCILE_RESYNC_PERIOD=300");
    println!("RECONCILE_BACKOFF_BASE_MS=5");
    println!("RECONCILE_BACKOFF_MAX_SECS=300");
    println!("RECONCILE_MAX_FAILURES=5");
    println!("RECONCILE_ROLLOUT_REQUEUE_MS=500");
    println!("RECONCILE_RELIST_BACKOFF_MS=1000");
    println!("RECONCILE_SHUTDOWN_TIMEOUT=30");
    println!("RECONCILE_LOG_FORMAT=json");
    println!("RECONCILE_LOG_LEVEL=info");
}

/// Validate configuration for obvious misconfigurations.
///
/// Returns 0 if valid, 1 if the file cannot be loaded or any warnings are
/// found.
pub fn run_validate(file: Option<&Path>) -> i32 {
    let env = match config::load_with_file(file) {
        Ok(env) => env,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return 1;
        }
    };
    let warnings = env.warnings();
    for w in &warnings {
        eprintln!("WARNING: {}", w);
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn print_config(cfg: &EffectiveConfig) {
    println!("RECONCILE_WORKERS={}", cfg.workers);
    println!("RECONCILE_RESYNC_PERIOD={}", cfg.resync_period_secs);
    println!("RECONCILE_BACKOFF_BASE_MS={}", cfg.backoff_base_ms);
    println!("RECONCILE_BACKOFF_MAX_SECS={}", cfg.backoff_max_secs);
    println!("RECONCILE_MAX_FAILURES={}", cfg.max_failures);
    println!("RECONCILE_ROLLOUT_REQUEUE_MS={}", cfg.rollout_requeue_ms);
    println!("RECONCILE_RELIST_BACKOFF_MS={}", cfg.relist_backoff_ms);
    println!("RECONCILE_SHUTDOWN_TIMEOUT={}", cfg.shutdown_timeout_secs);
    println!("RECONCILE_LOG_FORMAT={}", cfg.log_format);
    println!("RECONCILE_LOG_LEVEL={}", cfg.log_level);
    if let Some(path) = &cfg.config_file {
        println!("RECONCILE_CONFIG={}", path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{clear_env_vars, ENV_LOCK};
    use std::io::Write;

    #[test]
    fn test_validate_passes_with_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        assert_eq!(run_validate(None), 0, "default config should pass validation");
    }

    #[test]
    fn test_validate_fails_when_base_exceeds_max() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("RECONCILE_BACKOFF_BASE_MS", "10000");
        std::env::set_var("RECONCILE_BACKOFF_MAX_SECS", "2");
        assert_eq!(run_validate(None), 1);
        clear_env_vars();
    }

    #[test]
    fn test_validate_fails_on_unreadable_file() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers = \"many\"").unwrap();
        assert_eq!(run_validate(Some(file.path())), 1);
        assert_eq!(run_show(Some(file.path())), 1);
    }

    #[test]
    fn test_print_config_includes_all_fields() {
        let cfg = EffectiveConfig {
            workers: 4,
            resync_period_secs: 300,
            backoff_base_ms: 5,
            backoff_max_secs: 300,
            max_failures: 5,
            rollout_requeue_ms: 500,
            relist_backoff_ms: 1000,
            shutdown_timeout_secs: 30,
            log_format: "json".to_string(),
            log_level: "info".to_string(),
            config_file: Some("/etc/reconcile.toml".to_string()),
        };
        print_config(&cfg);
    }
}
