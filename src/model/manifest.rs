//! YAML/JSON manifests to typed desired-state submissions.
//!
//! A manifest is the familiar `apiVersion` / `kind` / `metadata` / `spec`
//! document. ConfigMap and Secret carry their payload at the top level; it is
//! folded into the record spec so immutability checks see one document.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::identity::{ResourceIdentity, ResourceKind};
use super::record::{Labels, ResourceRecord};
use super::validate::{validate_identity, validate_labels, validate_spec, ValidationError};

pub const DEFAULT_NAMESPACE: &str = "default";

/// Top-level keys that hold the payload for ConfigMap / Secret.
const PAYLOAD_KEYS: &[&str] = &["data", "binaryData", "stringData", "immutable", "type"];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document {index}: {reason}")]
    Malformed { index: usize, reason: String },

    #[error("document {index} ({identity}): {source}")]
    Invalid {
        index: usize,
        identity: String,
        #[source]
        source: ValidationError,
    },
}

/// One parsed desired-state submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub identity: ResourceIdentity,
    pub labels: Labels,
    pub owner_references: BTreeSet<ResourceIdentity>,
    pub spec: Value,
    /// Only meaningful for observed fixtures (`reconcile-core plan`).
    pub status: Value,
}

impl Manifest {
    /// Build from a decoded document; `index` is used for error messages.
    pub fn from_value(index: usize, doc: Value) -> Result<Self, ManifestError> {
        let malformed = |reason: String| ManifestError::Malformed { index, reason };

        let Value::Object(mut obj) = doc else {
            return Err(malformed("document is not a mapping".into()));
        };

        let kind: ResourceKind = obj
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing kind".into()))?
            .parse()
            .map_err(|e: super::identity::UnknownKind| malformed(e.to_string()))?;

        let metadata = obj.remove("metadata").unwrap_or(Value::Object(Map::new()));
        let meta: ManifestMetadata = serde_json::from_value(metadata)
            .map_err(|e| malformed(format!("metadata: {}", e)))?;
        let name = meta.name.ok_or_else(|| malformed("missing metadata.name".into()))?;
        let namespace = if kind.is_namespaced() {
            meta.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
        } else {
            String::new()
        };
        let identity = ResourceIdentity::new(kind, namespace, name);

        let owner_references = meta
            .owner_references
            .into_iter()
            .map(|o| -> Result<ResourceIdentity, ManifestError> {
                let owner_kind: ResourceKind = o
                    .kind
                    .parse()
                    .map_err(|e: super::identity::UnknownKind| malformed(e.to_string()))?;
                Ok(identity.sibling(owner_kind, o.name))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        let spec = if kind.supports_immutable() {
            let mut payload = Map::new();
            for key in PAYLOAD_KEYS {
                if let Some(v) = obj.remove(*key) {
                    payload.insert((*key).to_string(), v);
                }
            }
            Value::Object(payload)
        } else {
            obj.remove("spec").unwrap_or(Value::Null)
        };
        let status = obj.remove("status").unwrap_or(Value::Null);

        Ok(Self {
            identity,
            labels: meta.labels,
            owner_references,
            spec,
            status,
        })
    }

    /// Parse a multi-document YAML stream (JSON is valid YAML). Empty
    /// documents are skipped.
    pub fn parse_str(input: &str) -> Result<Vec<Self>, ManifestError> {
        let mut out = Vec::new();
        for (index, doc) in serde_yaml::Deserializer::from_str(input).enumerate() {
            let value = Value::deserialize(doc)?;
            if value.is_null() {
                continue;
            }
            // A JSON array or a `kind: List` wraps several objects.
            match value {
                Value::Array(items) => {
                    for item in items {
                        out.push(Self::from_value(index, item)?);
                    }
                }
                Value::Object(ref obj)
                    if obj.get("kind").and_then(Value::as_str) == Some("List") =>
                {
                    let items = obj.get("items").cloned().unwrap_or(Value::Array(vec![]));
                    if let Value::Array(items) = items {
                        for item in items {
                            out.push(Self::from_value(index, item)?);
                        }
                    }
                }
                other => out.push(Self::from_value(index, other)?),
            }
        }
        Ok(out)
    }

    pub fn load_file(path: &Path) -> Result<Vec<Self>, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_str(&text)
    }

    /// Load every `*.yaml`, `*.yml` and `*.json` under a directory (sorted by
    /// file name), or a single file.
    pub fn load_path(path: &Path) -> Result<Vec<Self>, ManifestError> {
        if !path.is_dir() {
            return Self::load_file(path);
        }
        let io_err = |source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        };
        let mut files: Vec<_> = std::fs::read_dir(path)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml") | Some("json")
                )
            })
            .collect();
        files.sort();
        let mut out = Vec::new();
        for file in files {
            out.extend(Self::load_file(&file)?);
        }
        Ok(out)
    }

    /// The submission as a bare record, as a backend would report it.
    pub fn to_record(&self) -> ResourceRecord {
        let mut record = ResourceRecord::new(self.identity.clone(), self.spec.clone())
            .with_labels(self.labels.clone())
            .with_status(self.status.clone());
        record.owner_references = self.owner_references.clone();
        record
    }

    /// Admission checks for this submission.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_identity(&self.identity)?;
        validate_labels(&self.labels)?;
        if self.identity.kind.is_observed_only() {
            return Err(ValidationError::new(
                "kind",
                format!("{} is observed-only", self.identity.kind),
            ));
        }
        validate_spec(self.identity.kind, &self.spec)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestOwnerRef {
    kind: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    labels: Labels,
    #[serde(default)]
    owner_references: Vec<ManifestOwnerRef>,
}
