//! Reconciliation error types.

use thiserror::Error;

use crate::backend::BackendError;
use crate::model::ResourceIdentity;
use crate::store::StoreError;

/// Failure of one reconciliation pass. Never escapes a worker: it becomes a
/// backoff requeue and, past the failure threshold, a Degraded condition.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{verb} {identity} failed: {source}")]
    ActionExecution {
        identity: ResourceIdentity,
        verb: &'static str,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Transient failures are retried with backoff. Admission failures
    /// (validation, immutability) only clear when the desired record
    /// changes, which enqueues the identity anyway.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ActionExecution { .. } => true,
            Self::Store(err) => err.is_conflict() || err.is_not_found(),
        }
    }
}
