//! reconcile-core
//!
//! A declarative reconciliation engine in the style of a Kubernetes
//! controller. Users submit desired state; watch consumers mirror live state
//! from an external backend into an observed cache; a pool of workers pulls
//! resource identities from a deduplicating work queue and drives observed
//! state towards desired state through a pure plan engine.
//!
//! # Data flow
//!
//! ```text
//! backend watch ─▶ ObservedCache ─▶ WorkQueue ─▶ Reconciler ─▶ plan() ─▶ backend write
//!                                      ▲                                     │
//!                 DesiredStateStore ───┘ ◀──────── next watch event ◀────────┘
//! ```
//!
//! # Guarantees
//!
//! - At most one active reconciliation per identity.
//! - Level-triggered: each pass re-derives the plan from fresh state.
//! - Idempotent: desired equal to observed plans nothing.

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod controller;
pub mod health;
pub mod model;
pub mod plan;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod telemetry;

pub use backend::{InMemoryBackend, StateBackend};
pub use controller::{ControllerRuntime, RuntimeConfig};
pub use model::{ResourceIdentity, ResourceKind, ResourceRecord, ResourceVersion};
pub use store::{DesiredStateStore, StoreError};
