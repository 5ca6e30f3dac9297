//! Plan engine: a pure function from (desired, observed) to ordered batches
//! of backend actions.
//!
//! Actions inside a batch may run concurrently; batches run strictly in
//! order. The full plan is always computed so it can be inspected or
//! simulated, but the reconciler only executes the first batch per pass and
//! replans from fresh observed state afterwards.

mod daemon;
mod job;
mod ordinal;
pub mod pods;
mod rollout;
mod simulate;

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::model::spec::{PodManagementPolicy, StatefulSetSpec};
use crate::model::{ResourceIdentity, ResourceKind, ResourceRecord, ResourceVersion, ValidationError};

pub use job::{count_pods, JobCounts};
pub use simulate::{BatchEffect, Simulation};

/// Why a plan refuses to act.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Rejection {
    /// Spec change submitted against an immutable object.
    ImmutableViolation,
    /// The stored spec cannot be interpreted for planning.
    InvalidSpec { field: String, reason: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImmutableViolation => f.write_str("ImmutableViolation"),
            Self::InvalidSpec { field, reason } => write!(f, "InvalidSpec: {}: {}", field, reason),
        }
    }
}

impl From<ValidationError> for Rejection {
    fn from(err: ValidationError) -> Self {
        Self::InvalidSpec {
            field: err.field,
            reason: err.reason,
        }
    }
}

/// A single backend mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    Create {
        record: ResourceRecord,
    },
    Update {
        record: ResourceRecord,
        expected: Option<ResourceVersion>,
    },
    Delete {
        identity: ResourceIdentity,
        expected: Option<ResourceVersion>,
    },
    Reject {
        identity: ResourceIdentity,
        reason: Rejection,
    },
}

impl Action {
    pub fn identity(&self) -> &ResourceIdentity {
        match self {
            Self::Create { record } | Self::Update { record, .. } => &record.identity,
            Self::Delete { identity, .. } | Self::Reject { identity, .. } => identity,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Reject { .. } => "reject",
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Self::Create { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }

    fn delete(identity: ResourceIdentity) -> Self {
        Self::Delete {
            identity,
            expected: None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reject { identity, reason } => write!(f, "reject {} ({})", identity, reason),
            other => write!(f, "{} {}", other.verb(), other.identity()),
        }
    }
}

pub type Batch = Vec<Action>;

/// Ordered batches of actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionPlan {
    pub batches: Vec<Batch>,
}

impl ActionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    fn single(action: Action) -> Self {
        Self {
            batches: vec![vec![action]],
        }
    }

    fn rejected(identity: &ResourceIdentity, reason: Rejection) -> Self {
        Self::single(Action::Reject {
            identity: identity.clone(),
            reason,
        })
    }

    /// Append a batch; empty batches are dropped.
    pub fn push(&mut self, batch: Batch) {
        if !batch.is_empty() {
            self.batches.push(batch);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn first_batch(&self) -> Option<&[Action]> {
        self.batches.first().map(Vec::as_slice)
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.batches.iter().flatten()
    }

    pub fn action_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        self.actions().find_map(|a| match a {
            Action::Reject { reason, .. } => Some(reason),
            _ => None,
        })
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection().is_some()
    }
}

/// Observed side of a plan: the object itself plus the records whose shape
/// depends on it.
#[derive(Debug, Clone, Default)]
pub struct Observed {
    pub object: Option<ResourceRecord>,
    /// Records owned by the object, plus retained claims for StatefulSets.
    pub children: Vec<ResourceRecord>,
    /// Nodes, consulted by DaemonSet planning only.
    pub nodes: Vec<ResourceRecord>,
}

impl Observed {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn of(object: ResourceRecord) -> Self {
        Self {
            object: Some(object),
            ..Self::default()
        }
    }

    pub fn with_children(mut self, children: Vec<ResourceRecord>) -> Self {
        self.children = children;
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<ResourceRecord>) -> Self {
        self.nodes = nodes;
        self
    }
}

/// Objects the controller converges towards the desired store. Children
/// belong to their owner's reconciliation; retained claims outlive their
/// StatefulSet; nodes are never managed.
pub fn is_top_level(record: &ResourceRecord) -> bool {
    record.owner_references.is_empty()
        && !record.labels.contains_key(pods::RETAINED_BY)
        && !record.kind().is_observed_only()
}

fn is_frozen(record: &ResourceRecord) -> bool {
    record.kind().supports_immutable()
        && record.spec.get("immutable").and_then(Value::as_bool) == Some(true)
}

fn object_drifted(desired: &ResourceRecord, observed: &ResourceRecord) -> bool {
    desired.spec != observed.spec
        || desired.labels != observed.labels
        || desired.owner_references != observed.owner_references
}

/// Compute the actions that move `observed` towards `desired`.
///
/// A finalizing desired record tears the object down. Without any desired
/// record only top-level objects are deleted; children belong to their
/// owner's plan. When desired and observed agree and the children are
/// converged the plan is empty.
pub fn plan(desired: Option<&ResourceRecord>, observed: &Observed) -> ActionPlan {
    match (desired, observed.object.as_ref()) {
        (Some(d), object) if d.is_finalizing() => teardown(Some(d), object, &observed.children),
        (None, Some(object)) if !is_top_level(object) => ActionPlan::new(),
        (None, object) => teardown(None, object, &observed.children),
        (Some(desired), object) => converge(desired, object, observed),
    }
}

/// Children first, then the object. Children go in one batch, except for
/// an ordered StatefulSet whose pods terminate one per batch from the
/// highest ordinal down.
fn teardown(
    desired: Option<&ResourceRecord>,
    object: Option<&ResourceRecord>,
    children: &[ResourceRecord],
) -> ActionPlan {
    let mut owned: Vec<&ResourceRecord> = children
        .iter()
        .filter(|c| !c.owner_references.is_empty())
        .collect();
    owned.sort_by(|a, b| pods::ordinal_sort_key(b).cmp(&pods::ordinal_sort_key(a)));

    let mut plan = ActionPlan::new();
    if terminates_in_order(desired.or(object), &owned) {
        let (ordered, rest): (Vec<_>, Vec<_>) = owned
            .into_iter()
            .partition(|c| c.kind() == ResourceKind::Pod);
        for pod in ordered {
            plan.push(vec![Action::delete(pod.identity.clone())]);
        }
        plan.push(rest.into_iter().map(|c| Action::delete(c.identity.clone())).collect());
    } else {
        plan.push(
            owned
                .into_iter()
                .map(|c| Action::delete(c.identity.clone()))
                .collect(),
        );
    }
    if let Some(object) = object {
        plan.push(vec![Action::Delete {
            identity: object.identity.clone(),
            expected: Some(object.resource_version),
        }]);
    }
    plan
}

/// StatefulSet pods stop one at a time unless the set is `Parallel`. With
/// neither desired nor observed object left, the pods' own StatefulSet
/// label decides.
fn terminates_in_order(owner: Option<&ResourceRecord>, children: &[&ResourceRecord]) -> bool {
    match owner {
        Some(owner) if owner.kind() == ResourceKind::StatefulSet => owner
            .spec_as::<StatefulSetSpec>()
            .map_or(true, |spec| spec.pod_management_policy != PodManagementPolicy::Parallel),
        Some(_) => false,
        None => children
            .iter()
            .any(|c| c.labels.contains_key(pods::STATEFULSET_POD_NAME)),
    }
}

fn converge(
    desired: &ResourceRecord,
    object: Option<&ResourceRecord>,
    observed: &Observed,
) -> ActionPlan {
    if let Some(current) = object {
        if is_frozen(current) && current.spec != desired.spec {
            return ActionPlan::rejected(&desired.identity, Rejection::ImmutableViolation);
        }
    }

    let object_action = match object {
        None => Some(Action::Create {
            record: desired.to_backend_object(),
        }),
        Some(current) if object_drifted(desired, current) => Some(Action::Update {
            record: desired.to_backend_object(),
            expected: Some(current.resource_version),
        }),
        Some(_) => None,
    };

    let children = match desired.kind() {
        ResourceKind::Deployment => rollout::plan(desired, &observed.children),
        ResourceKind::StatefulSet => ordinal::plan(desired, &observed.children),
        ResourceKind::DaemonSet => daemon::plan(desired, &observed.children, &observed.nodes),
        ResourceKind::Job => job::plan(desired, &observed.children),
        _ => Ok(Vec::new()),
    };
    let mut child_batches = match children {
        Ok(batches) => batches,
        Err(err) => return ActionPlan::rejected(&desired.identity, err.into()),
    };

    let mut plan = ActionPlan::new();
    match object_action {
        Some(action) if child_batches.is_empty() => plan.push(vec![action]),
        Some(action) => child_batches[0].insert(0, action),
        None => {}
    }
    for batch in child_batches {
        plan.push(batch);
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cm(spec: Value) -> ResourceRecord {
        ResourceRecord::new(
            ResourceIdentity::new(ResourceKind::ConfigMap, "default", "cfg"),
            spec,
        )
    }

    #[test]
    fn test_absent_desired_and_observed_is_empty() {
        assert!(plan(None, &Observed::absent()).is_empty());
    }

    #[test]
    fn test_create_when_observed_absent() {
        let desired = cm(json!({"data": {"a": "1"}}));
        let p = plan(Some(&desired), &Observed::absent());
        assert_eq!(p.action_count(), 1);
        assert!(p.batches[0][0].is_create());
    }

    #[test]
    fn test_identical_is_empty() {
        let desired = cm(json!({"data": {"a": "1"}}));
        let observed = Observed::of(desired.to_backend_object());
        assert!(plan(Some(&desired), &observed).is_empty());
    }

    #[test]
    fn test_update_uses_observed_version() {
        let desired = cm(json!({"data": {"a": "2"}}));
        let current = cm(json!({"data": {"a": "1"}})).with_version(ResourceVersion::new(42));
        let p = plan(Some(&desired), &Observed::of(current));
        match &p.batches[0][0] {
            Action::Update { expected, .. } => assert_eq!(*expected, Some(ResourceVersion::new(42))),
            other => panic!("expected update, got {}", other),
        }
    }

    #[test]
    fn test_frozen_object_rejects_change() {
        let desired = cm(json!({"data": {"a": "2"}, "immutable": true}));
        let current = cm(json!({"data": {"a": "1"}, "immutable": true}));
        let p = plan(Some(&desired), &Observed::of(current));
        assert_eq!(p.rejection(), Some(&Rejection::ImmutableViolation));
    }

    #[test]
    fn test_child_object_without_desired_is_left_alone() {
        let owner = ResourceIdentity::new(ResourceKind::Deployment, "default", "web");
        let pod = ResourceRecord::new(
            ResourceIdentity::new(ResourceKind::Pod, "default", "web-x-0"),
            json!({}),
        )
        .with_owner(owner);
        assert!(plan(None, &Observed::of(pod)).is_empty());
    }

    #[test]
    fn test_plan_serializes_with_action_tag() {
        let desired = cm(json!({}));
        let p = plan(Some(&desired), &Observed::absent());
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["batches"][0][0]["action"], "create");
    }
}
