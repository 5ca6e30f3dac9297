//! The stored form of a resource: identity, versions, metadata, spec and status.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::identity::{ResourceIdentity, ResourceKind};
use super::validate::ValidationError;

/// Label map. Ordered so that equality and hashing ignore insertion order.
pub type Labels = BTreeMap<String, String>;

/// Opaque optimistic-concurrency token.
///
/// Versions are only comparable for the same identity within the same
/// store or backend; they increase on every persisted mutation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single resource as held by the desired-state store, the observed
/// cache or the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub identity: ResourceIdentity,
    pub uid: Uuid,
    /// Bumped on every spec change, never on status-only writes.
    pub generation: u64,
    pub resource_version: ResourceVersion,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub owner_references: BTreeSet<ResourceIdentity>,
    #[serde(default)]
    pub finalizers: BTreeSet<String>,
    /// Set by the backend when the object is first written.
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: Value,
}

impl ResourceRecord {
    pub fn new(identity: ResourceIdentity, spec: Value) -> Self {
        Self {
            identity,
            uid: Uuid::new_v4(),
            generation: 1,
            resource_version: ResourceVersion::default(),
            labels: Labels::new(),
            owner_references: BTreeSet::new(),
            finalizers: BTreeSet::new(),
            creation_timestamp: None,
            deletion_timestamp: None,
            spec,
            status: Value::Null,
        }
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_owner(mut self, owner: ResourceIdentity) -> Self {
        self.owner_references.insert(owner);
        self
    }

    pub fn with_status(mut self, status: Value) -> Self {
        self.status = status;
        self
    }

    pub fn with_version(mut self, version: ResourceVersion) -> Self {
        self.resource_version = version;
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.identity.kind
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn namespace(&self) -> &str {
        &self.identity.namespace
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Deleted but still held back by finalizers.
    pub fn is_finalizing(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn is_owned_by(&self, owner: &ResourceIdentity) -> bool {
        self.owner_references.contains(owner)
    }

    /// Deserialize the spec into the typed view for its kind.
    pub fn spec_as<T: DeserializeOwned>(&self) -> Result<T, ValidationError> {
        spec_view(&self.spec)
    }

    /// The copy of a desired record that is written to the backend:
    /// identity, metadata and spec only. Status on the backend side is owned
    /// by the backend (kubelet, load balancer, ...), never by the submitter.
    pub fn to_backend_object(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            uid: self.uid,
            generation: self.generation,
            resource_version: ResourceVersion::default(),
            labels: self.labels.clone(),
            owner_references: self.owner_references.clone(),
            finalizers: BTreeSet::new(),
            creation_timestamp: None,
            deletion_timestamp: None,
            spec: self.spec.clone(),
            status: Value::Null,
        }
    }
}

/// Deserialize a spec document into a typed view.
pub fn spec_view<T: DeserializeOwned>(spec: &Value) -> Result<T, ValidationError> {
    let doc = if spec.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        spec.clone()
    };
    serde_json::from_value(doc).map_err(|e| ValidationError::new("spec", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn labels_ignore_insertion_order() {
        let id = ResourceIdentity::new(ResourceKind::Pod, "default", "p");
        let a = ResourceRecord::new(id.clone(), Value::Null)
            .with_label("app", "web")
            .with_label("tier", "front");
        let b = ResourceRecord::new(id, Value::Null)
            .with_label("tier", "front")
            .with_label("app", "web");
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn backend_object_strips_status_and_finalizers() {
        let id = ResourceIdentity::new(ResourceKind::Service, "default", "svc");
        let mut rec = ResourceRecord::new(id, json!({"ports": [{"port": 80}]}))
            .with_status(json!({"endpoints": []}))
            .with_version(ResourceVersion::new(7));
        rec.finalizers.insert("x".into());
        let obj = rec.to_backend_object();
        assert_eq!(obj.status, Value::Null);
        assert!(obj.finalizers.is_empty());
        assert_eq!(obj.resource_version, ResourceVersion::default());
        assert_eq!(obj.spec, rec.spec);
        assert_eq!(obj.uid, rec.uid);
    }
}
