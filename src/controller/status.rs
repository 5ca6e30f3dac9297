//! Status documents written back to the desired store.
//!
//! Status flows from observed state to the desired record, never the other
//! way. Conditions keep their `lastTransitionTime` until their `status`
//! flips, so rewriting an unchanged status is a no-op in the store.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::model::spec::{DeploymentSpec, JobSpec, ServiceSpec, StatefulSetSpec, UpdateStrategyType};
use crate::model::{LabelSelector, ResourceKind, ResourceRecord};
use crate::plan::pods::{self, CONTROLLER_REVISION, POD_TEMPLATE_HASH};
use crate::plan::{count_pods, Observed, Rejection};

pub const READY: &str = "Ready";
pub const PROGRESSING: &str = "Progressing";
pub const DEGRADED: &str = "Degraded";
pub const REJECTED: &str = "Rejected";
pub const COMPLETE: &str = "Complete";
pub const FAILED: &str = "Failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: String,
}

impl Condition {
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Conditions currently recorded in a status document.
pub fn conditions(status: &Value) -> Vec<Condition> {
    status
        .get("conditions")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Find a condition by type.
pub fn condition(status: &Value, condition_type: &str) -> Option<Condition> {
    conditions(status)
        .into_iter()
        .find(|c| c.condition_type == condition_type)
}

fn merge_conditions(previous: &[Condition], next: Vec<Condition>) -> Vec<Condition> {
    next.into_iter()
        .map(|mut c| {
            if let Some(prev) = previous
                .iter()
                .find(|p| p.condition_type == c.condition_type && p.status == c.status)
            {
                c.last_transition_time = prev.last_transition_time.clone();
            }
            c
        })
        .collect()
}

/// Replace (or add) one condition, leaving the rest of `status` alone.
pub fn with_condition(status: &Value, cond: Condition) -> Value {
    let previous = conditions(status);
    let mut merged: Vec<Condition> = previous
        .iter()
        .filter(|c| c.condition_type != cond.condition_type)
        .cloned()
        .collect();
    merged.extend(merge_conditions(&previous, vec![cond]));
    merged.sort_by(|a, b| a.condition_type.cmp(&b.condition_type));

    let mut out = match status {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    out.insert("conditions".into(), json!(merged));
    Value::Object(out)
}

/// What the reconciler learned this pass.
#[derive(Debug, Default)]
pub struct PassSummary<'a> {
    pub rejection: Option<&'a Rejection>,
    /// Batches still to run after this pass; 0 means converged.
    pub pending_batches: usize,
    /// Actions executed during this pass.
    pub executed: usize,
    /// Set while the identity is Degraded.
    pub failure: Option<&'a str>,
    /// Service endpoints derived by selector.
    pub endpoints: Option<Vec<String>>,
}

/// Build the status document for `desired` from what was observed.
pub fn synthesize(
    desired: &ResourceRecord,
    observed: &Observed,
    pass: &PassSummary<'_>,
    now: DateTime<Utc>,
) -> Value {
    let mut status = Map::new();
    status.insert("observedGeneration".into(), json!(desired.generation));
    counts_into(desired, observed, pass, &mut status);

    let converged = pass.pending_batches == 0 && pass.executed == 0;
    // An empty plan can also mean the planner is waiting on pod readiness.
    let settled = converged && pods_settled(desired, &status);
    let mut next = Vec::new();
    match pass.rejection {
        Some(reason) => {
            next.push(Condition::new(REJECTED, true, reason_tag(reason), reason.to_string(), now));
            next.push(Condition::new(READY, false, "Rejected", "", now));
        }
        None => {
            next.push(Condition::new(REJECTED, false, "Accepted", "", now));
            let (ready_reason, ready) = if settled {
                ("Converged", pass.failure.is_none())
            } else {
                ("Progressing", false)
            };
            next.push(Condition::new(READY, ready, ready_reason, "", now));
        }
    }
    if settled {
        next.push(Condition::new(PROGRESSING, false, "Complete", "", now));
    } else if converged {
        next.push(Condition::new(
            PROGRESSING,
            true,
            "WaitingForPods",
            "pods are not yet ready and current",
            now,
        ));
    } else {
        next.push(Condition::new(
            PROGRESSING,
            true,
            "ActionsApplied",
            format!("{} batch(es) remaining", pass.pending_batches),
            now,
        ));
    }
    match pass.failure {
        Some(message) => next.push(Condition::new(DEGRADED, true, "ReconcileFailed", message, now)),
        None => next.push(Condition::new(DEGRADED, false, "Healthy", "", now)),
    }
    if desired.kind() == ResourceKind::Job {
        next.extend(job_conditions(desired, observed, now));
    }

    let mut merged = merge_conditions(&conditions(&desired.status), next);
    merged.sort_by(|a, b| a.condition_type.cmp(&b.condition_type));
    status.insert("conditions".into(), json!(merged));
    Value::Object(status)
}

/// Whether a workload's pods match its desired count, revision and
/// readiness. Kinds without pods are always settled.
fn pods_settled(desired: &ResourceRecord, status: &Map<String, Value>) -> bool {
    let count = |key: &str| status.get(key).and_then(Value::as_i64).unwrap_or(0);
    let (replicas, updated, ready) = (
        count("replicas"),
        count("updatedReplicas"),
        count("readyReplicas"),
    );
    match desired.kind() {
        ResourceKind::Deployment => desired
            .spec_as::<DeploymentSpec>()
            .is_ok_and(|spec| replicas == spec.replicas && updated == spec.replicas && ready == spec.replicas),
        ResourceKind::StatefulSet => desired.spec_as::<StatefulSetSpec>().is_ok_and(|spec| {
            // Ordinals below the partition, or every ordinal under OnDelete,
            // may legitimately stay on the old revision.
            let must_update = if spec.update_strategy.strategy_type == UpdateStrategyType::OnDelete {
                0
            } else {
                spec.replicas - spec.partition().clamp(0, spec.replicas)
            };
            replicas == spec.replicas && ready == spec.replicas && updated >= must_update
        }),
        // The node set fixes the count; an empty plan means it already matches.
        ResourceKind::DaemonSet => updated == replicas && ready == replicas,
        _ => true,
    }
}

fn reason_tag(reason: &Rejection) -> &'static str {
    match reason {
        Rejection::ImmutableViolation => "ImmutableViolation",
        Rejection::InvalidSpec { .. } => "InvalidSpec",
    }
}

fn counts_into(
    desired: &ResourceRecord,
    observed: &Observed,
    pass: &PassSummary<'_>,
    status: &mut Map<String, Value>,
) {
    let pods: Vec<&ResourceRecord> = observed
        .children
        .iter()
        .filter(|c| c.kind() == ResourceKind::Pod)
        .collect();
    let ready = pods.iter().filter(|p| pods::is_available(p)).count();

    let revision_label = match desired.kind() {
        ResourceKind::Deployment => Some(POD_TEMPLATE_HASH),
        ResourceKind::StatefulSet | ResourceKind::DaemonSet => Some(CONTROLLER_REVISION),
        _ => None,
    };
    if let Some(label) = revision_label {
        let revision = pods::template_hash(&pods::template_of(&desired.spec));
        let updated = pods
            .iter()
            .filter(|p| p.label(label) == Some(revision.as_str()))
            .count();
        status.insert("replicas".into(), json!(pods.len()));
        status.insert("updatedReplicas".into(), json!(updated));
        status.insert("readyReplicas".into(), json!(ready));
        return;
    }

    match desired.kind() {
        ResourceKind::Job => {
            let counts = count_pods(&observed.children);
            status.insert("active".into(), json!(counts.active));
            status.insert("succeeded".into(), json!(counts.succeeded));
            status.insert("failed".into(), json!(counts.failed));
        }
        ResourceKind::Service => {
            status.insert(
                "endpoints".into(),
                json!(pass.endpoints.clone().unwrap_or_default()),
            );
        }
        _ => {}
    }
}

fn job_conditions(desired: &ResourceRecord, observed: &Observed, now: DateTime<Utc>) -> Vec<Condition> {
    let Ok(spec) = desired.spec_as::<JobSpec>() else {
        return Vec::new();
    };
    let counts = count_pods(&observed.children);
    let mut out = Vec::new();
    if counts.succeeded >= spec.completions() {
        out.push(Condition::new(COMPLETE, true, "CompletionsReached", "", now));
    }
    if counts.failed > spec.backoff_limit() {
        out.push(Condition::new(
            FAILED,
            true,
            "BackoffLimitExceeded",
            format!("{} failed pod(s), limit {}", counts.failed, spec.backoff_limit()),
            now,
        ));
    }
    out
}

/// Selector a Service uses to pick its endpoints.
pub fn service_selector(service: &ResourceRecord) -> LabelSelector {
    service
        .spec_as::<ServiceSpec>()
        .map(|s| LabelSelector::from_labels(s.selector))
        .unwrap_or_default()
}
