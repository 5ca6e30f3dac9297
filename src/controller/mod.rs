//! Control loop: per-identity reconciliation, status synthesis, watch
//! consumers and the runtime that wires them to the work queue.

mod error;
mod reconciler;
mod runtime;
pub mod status;
mod watch;

pub use error::ReconcileError;
pub use reconciler::{ReconcileOutcome, Reconciler, ReconcilerConfig};
pub use runtime::{ControllerRuntime, RuntimeConfig};
pub use watch::{spawn_watch, TriggerRouter, WatchConfig, WatchContext};
