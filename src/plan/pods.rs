//! Pod and claim construction shared by the workload strategies.

use std::collections::BTreeSet;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::model::spec::PodStatus;
use crate::model::{Labels, ResourceKind, ResourceRecord};

/// Revision label on Deployment pods.
pub const POD_TEMPLATE_HASH: &str = "pod-template-hash";
/// Revision label on StatefulSet and DaemonSet pods.
pub const CONTROLLER_REVISION: &str = "controller-revision-hash";
pub const STATEFULSET_POD_NAME: &str = "statefulset.kubernetes.io/pod-name";
/// Marks a claim created for a StatefulSet ordinal. Such claims carry no
/// owner reference and survive scale-down and deletion of the set.
pub const RETAINED_BY: &str = "reconcile-core/retained-by";

/// First ten hex characters of SHA-256 over the canonical template JSON.
pub fn template_hash(template: &Value) -> String {
    let bytes = serde_json::to_vec(template).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let mut hash = hex::encode(digest);
    hash.truncate(10);
    hash
}

/// Deterministic uid for a planned child, so the same inputs always plan
/// the same records.
fn child_uid(owner: &ResourceRecord, name: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(owner.uid.as_bytes());
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Raw pod template of a workload spec.
pub fn template_of(spec: &Value) -> Value {
    spec.get("template").cloned().unwrap_or(Value::Null)
}

fn template_labels(template: &Value) -> Labels {
    template
        .pointer("/metadata/labels")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// A pod stamped from `template`, owned by `owner`.
pub fn pod_from_template(
    owner: &ResourceRecord,
    name: &str,
    template: &Value,
    extra_labels: &[(&str, &str)],
) -> ResourceRecord {
    let mut labels = template_labels(template);
    for (k, v) in extra_labels {
        labels.insert((*k).to_string(), (*v).to_string());
    }
    let spec = template.get("spec").cloned().unwrap_or_else(|| json!({}));
    let mut pod = ResourceRecord::new(owner.identity.sibling(ResourceKind::Pod, name), spec)
        .with_labels(labels)
        .with_owner(owner.identity.clone());
    pod.uid = child_uid(owner, name);
    pod
}

/// A persistent volume claim stamped from a claim template.
pub fn claim_from_template(
    owner: &ResourceRecord,
    name: &str,
    claim_template: &Value,
) -> ResourceRecord {
    let mut labels = template_labels(claim_template);
    labels.insert(RETAINED_BY.to_string(), owner.identity.name.clone());
    let spec = claim_template.get("spec").cloned().unwrap_or_else(|| json!({}));
    let mut claim = ResourceRecord::new(
        owner.identity.sibling(ResourceKind::PersistentVolumeClaim, name),
        spec,
    )
    .with_labels(labels);
    claim.uid = child_uid(owner, name);
    claim
}

pub fn pod_status(pod: &ResourceRecord) -> PodStatus {
    PodStatus::from_value(&pod.status)
}

pub fn is_available(pod: &ResourceRecord) -> bool {
    pod_status(pod).is_available()
}

/// `(name-without-ordinal, ordinal)` ordering key so that `web-10` sorts
/// after `web-9`.
pub fn ordinal_sort_key(record: &ResourceRecord) -> (String, Option<u64>) {
    let name = record.name();
    match name.rsplit_once('-') {
        Some((base, tail)) => match tail.parse::<u64>() {
            Ok(n) => (base.to_string(), Some(n)),
            Err(_) => (name.to_string(), None),
        },
        None => (name.to_string(), None),
    }
}

/// Ordinal of `{set}-{n}`.
pub fn parse_ordinal(set_name: &str, pod_name: &str) -> Option<usize> {
    pod_name
        .strip_prefix(set_name)?
        .strip_prefix('-')?
        .parse()
        .ok()
}

/// First `count` names `{prefix}-{i}` not already in `used`.
pub fn next_free_names(prefix: &str, used: &BTreeSet<String>, count: usize) -> Vec<String> {
    (0..)
        .map(|i| format!("{}-{}", prefix, i))
        .filter(|n| !used.contains(n))
        .take(count)
        .collect()
}

/// Status a freshly created pod is assumed to reach once its batch lands.
pub fn ready_status() -> Value {
    json!({"phase": "Running", "ready": true})
}
