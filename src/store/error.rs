//! Desired-state store errors.

use thiserror::Error;

use crate::model::{ResourceIdentity, ResourceVersion, ValidationError};

fn show_version(version: &Option<ResourceVersion>) -> String {
    match version {
        Some(v) => v.to_string(),
        None => "<absent>".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(
        "conflict on {identity}: expected resourceVersion {expected}, current {}",
        show_version(.current)
    )]
    Conflict {
        identity: ResourceIdentity,
        expected: ResourceVersion,
        current: Option<ResourceVersion>,
    },

    #[error("{0} is being deleted")]
    Terminating(ResourceIdentity),

    #[error("{0} not found")]
    NotFound(ResourceIdentity),

    #[error("{identity} is immutable: spec change rejected")]
    ImmutableViolation { identity: ResourceIdentity },
}

impl StoreError {
    /// Optimistic-concurrency failures, including writes racing a deletion.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Terminating(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
