//! Observed-state cache.

mod observed;

pub use observed::{EventOutcome, ObservedCache, Trigger};
