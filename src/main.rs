//! reconcile-core entry point.
//!
//! ## CLI Subcommands
//!
//! - `reconcile-core serve` - Run the controller against the in-memory backend (default)
//! - `reconcile-core validate FILE` - Admission-check manifests (exit 0/1)
//! - `reconcile-core plan DESIRED [OBSERVED]` - Print the action plan as JSON
//! - `reconcile-core config show|defaults|validate` - Inspect configuration

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{info, warn};

use reconcile_core::cli::{self, config_cmd};
use reconcile_core::config::{self, EnvConfig};
use reconcile_core::model::{Labels, Manifest};
use reconcile_core::shutdown::ShutdownResult;
use reconcile_core::telemetry;
use reconcile_core::{ControllerRuntime, InMemoryBackend};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    match command {
        "serve" | "" => {
            let manifests = flag_value(&args, "--manifests").map(PathBuf::from);
            let config_file = flag_value(&args, "--config").map(PathBuf::from);
            let env = match config::load_with_file(config_file.as_deref()) {
                Ok(env) => env,
                Err(e) => {
                    eprintln!("Configuration error: {}", e);
                    return ExitCode::from(2u8);
                }
            };
            if let Err(e) = telemetry::init_logging(&env.log) {
                eprintln!("Logging error: {}", e);
                return ExitCode::from(2u8);
            }
            match run_serve(env, manifests.as_deref()).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Server error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        "validate" => match args.get(2) {
            Some(path) => exit_code(cli::run_validate(Path::new(path))),
            None => {
                print_command_help("validate");
                ExitCode::from(2u8)
            }
        },
        "plan" => match args.get(2) {
            Some(desired) => {
                let observed = args.get(3).map(Path::new);
                exit_code(cli::run_plan(Path::new(desired), observed))
            }
            None => {
                print_command_help("plan");
                ExitCode::from(2u8)
            }
        },
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            let file = flag_value(&args, "--config").map(PathBuf::from);
            match subcommand {
                "show" => exit_code(config_cmd::run_show(file.as_deref())),
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => exit_code(config_cmd::run_validate(file.as_deref())),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("reconcile-core {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}

/// Value following `flag`, e.g. `--config FILE`.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Node names from `RECONCILE_NODES` (comma separated).
fn nodes_from_env() -> Vec<String> {
    std::env::var("RECONCILE_NODES")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

async fn run_serve(
    env: EnvConfig,
    manifests: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Stands in for a kubelet: pods report Ready as soon as they exist.
    let backend = Arc::new(InMemoryBackend::new().with_auto_ready_pods());
    for node in nodes_from_env() {
        backend.register_node(&node, Labels::new());
    }

    let runtime = ControllerRuntime::new(env.runtime_config(), backend);
    runtime.start();
    info!(workers = env.workers, "Controller started");

    if let Some(dir) = manifests {
        let parsed = Manifest::load_path(dir)?;
        let total = parsed.len();
        let mut applied = 0;
        for manifest in &parsed {
            match runtime.apply_manifest(manifest) {
                Ok(_) => applied += 1,
                Err(e) => warn!(resource = %manifest.identity, error = %e, "Manifest rejected"),
            }
        }
        info!(applied, total, path = %dir.display(), "Manifests applied");
    }

    tokio::signal::ctrl_c().await?;
    eprintln!("Shutdown signal received, draining...");

    match runtime.shutdown().await {
        ShutdownResult::Complete => eprintln!("Shutdown complete"),
        ShutdownResult::Timeout { remaining } => {
            eprintln!("Shutdown timeout, {} reconciliations remaining", remaining);
        }
    }
    Ok(())
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "reconcile-core - declarative resource reconciliation v{}

USAGE:
    reconcile-core [COMMAND] [OPTIONS]

COMMANDS:
    serve        Run the controller (default when no command given)
    validate     Admission-check manifests
    plan         Print the action plan for desired manifests
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

EXAMPLES:
    reconcile-core serve --manifests ./manifests
    reconcile-core validate deploy.yaml
    reconcile-core plan desired.yaml live.yaml
    reconcile-core config validate --config /etc/reconcile.toml

ENVIRONMENT:
    RECONCILE_*        Runtime tuning (see `reconcile-core config defaults`)
    RECONCILE_CONFIG   TOML file overlaid on the environment
    RECONCILE_NODES    Comma-separated node names for `serve`

EXIT CODES:
    0  Success
    1  Failure / invalid input
    2  Usage or configuration error
",
        version
    );
}

fn print_command_help(command: &str) {
    match command {
        "serve" => {
            eprintln!(
                "reconcile-core serve - Run the controller

USAGE:
    reconcile-core serve [--manifests DIR] [--config FILE]

DESCRIPTION:
    Starts watch consumers, the worker pool and periodic resync against an
    in-memory backend whose pods become Ready on creation. Every manifest
    in DIR is applied to the desired-state store. Ctrl+C drains in-flight
    reconciliations and exits.
"
            );
        }
        "validate" => {
            eprintln!(
                "reconcile-core validate - Admission-check manifests

USAGE:
    reconcile-core validate FILE|DIR

EXIT CODES:
    0  Every manifest is valid
    1  At least one manifest is invalid or unreadable
"
            );
        }
        "plan" => {
            eprintln!(
                "reconcile-core plan - Print action plans

USAGE:
    reconcile-core plan DESIRED [OBSERVED]

DESCRIPTION:
    Plans every manifest in DESIRED against the records in OBSERVED (treated
    as the live cluster, including pods and nodes) and prints the batches as
    JSON. Without OBSERVED every object is planned from scratch.
"
            );
        }
        "config" => {
            eprintln!(
                "reconcile-core config - Inspect configuration

USAGE:
    reconcile-core config show|defaults|validate [--config FILE]
"
            );
        }
        _ => {
            eprintln!("No help available for '{}'", command);
            print_usage();
        }
    }
}
