//! Resource model: identities, records, typed specs and admission checks.

pub mod identity;
pub mod manifest;
pub mod quantity;
pub mod record;
pub mod selector;
pub mod spec;
pub mod validate;

pub use identity::{ResourceIdentity, ResourceKind, UnknownKind};
pub use manifest::{Manifest, ManifestError};
pub use quantity::{Quantity, QuantityError};
pub use record::{Labels, ResourceRecord, ResourceVersion};
pub use selector::{select, LabelSelector, LabelSelectorRequirement, SelectorOperator};
pub use validate::{validate_identity, validate_spec, ValidationError};
