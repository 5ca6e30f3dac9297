//! Work scheduling: the identity work queue, retry backoff and the
//! reconciler worker pool.

mod backoff;
mod queue;
mod worker;

pub use backoff::{Backoff, BackoffConfig};
pub use queue::{ItemState, WorkQueue};
pub use worker::{spawn_worker, spawn_workers, WorkerContext};
