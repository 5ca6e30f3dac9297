//! Desired-state store and its error type.

mod desired;
mod error;

pub use desired::{ApplyMeta, DesiredEvent, DesiredStateStore, CONTROLLER_FINALIZER};
pub use error::StoreError;
