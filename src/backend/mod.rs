//! Backend abstraction: where observed state lives and where actions land.
//!
//! The controller reads the backend only through watches and relists, and
//! writes to it only by executing plan actions.

mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::{ResourceIdentity, ResourceKind, ResourceRecord, ResourceVersion};

pub use memory::{BackendOp, InMemoryBackend};

/// Watch event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
}

impl WatchEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Bookmark => "bookmark",
        }
    }
}

/// A change notification from the backend.
///
/// Deleted events carry the last known record stamped with the version of
/// the deletion. Bookmarks only advance the stream position.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(ResourceRecord),
    Modified(ResourceRecord),
    Deleted(ResourceRecord),
    Bookmark {
        kind: ResourceKind,
        resource_version: ResourceVersion,
    },
}

impl WatchEvent {
    pub fn event_type(&self) -> WatchEventType {
        match self {
            Self::Added(_) => WatchEventType::Added,
            Self::Modified(_) => WatchEventType::Modified,
            Self::Deleted(_) => WatchEventType::Deleted,
            Self::Bookmark { .. } => WatchEventType::Bookmark,
        }
    }

    pub fn record(&self) -> Option<&ResourceRecord> {
        match self {
            Self::Added(r) | Self::Modified(r) | Self::Deleted(r) => Some(r),
            Self::Bookmark { .. } => None,
        }
    }

    pub fn resource_version(&self) -> ResourceVersion {
        match self {
            Self::Added(r) | Self::Modified(r) | Self::Deleted(r) => r.resource_version,
            Self::Bookmark {
                resource_version, ..
            } => *resource_version,
        }
    }
}

/// Receiving half of a watch. A closed channel is a disconnect; the
/// consumer must relist before watching again.
pub type WatchStream = mpsc::Receiver<WatchEvent>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error(
        "conflict writing {identity}: expected resourceVersion {expected}, current {current}"
    )]
    Conflict {
        identity: ResourceIdentity,
        expected: ResourceVersion,
        current: ResourceVersion,
    },

    #[error("{0} not found")]
    NotFound(ResourceIdentity),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Subscribe to changes of one kind, starting after the current state.
    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, BackendError>;

    /// Full snapshot of one kind.
    async fn list(&self, kind: ResourceKind) -> Result<Vec<ResourceRecord>, BackendError>;

    /// Create or replace. With `expected` set the write only succeeds if the
    /// stored object is at that version. Returns the new version.
    async fn write(
        &self,
        identity: &ResourceIdentity,
        record: ResourceRecord,
        expected: Option<ResourceVersion>,
    ) -> Result<ResourceVersion, BackendError>;

    async fn delete(
        &self,
        identity: &ResourceIdentity,
        expected: Option<ResourceVersion>,
    ) -> Result<(), BackendError>;
}
