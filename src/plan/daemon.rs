//! DaemonSet pods: one per eligible node.
//!
//! A node is eligible when it is schedulable and its labels satisfy the
//! template's `nodeSelector`. Pods are named `{set}-{node}` and pinned with
//! `nodeName`. Rolling replacement deletes at most `maxUnavailable` stale
//! pods per batch, counting pods that are already unavailable.

use std::collections::BTreeMap;

use serde_json::Value;

use super::pods::{self, CONTROLLER_REVISION};
use super::{Action, Batch};
use crate::model::spec::{DaemonSetSpec, NodeSpec, UpdateStrategyType};
use crate::model::{ResourceIdentity, ResourceKind, ResourceRecord, ValidationError};

#[derive(Debug, Clone)]
struct Member {
    identity: ResourceIdentity,
    current: bool,
    available: bool,
}

fn node_of(pod: &ResourceRecord) -> Option<String> {
    pod.spec
        .get("nodeName")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn eligible_nodes(spec: &DaemonSetSpec, nodes: &[ResourceRecord]) -> Vec<String> {
    let selector = &spec.template.spec.node_selector;
    let mut out: Vec<String> = nodes
        .iter()
        .filter(|n| n.kind() == ResourceKind::Node)
        .filter(|n| {
            let node_spec: NodeSpec = n.spec_as().unwrap_or_default();
            !node_spec.unschedulable
        })
        .filter(|n| selector.iter().all(|(k, v)| n.labels.get(k) == Some(v)))
        .map(|n| n.name().to_string())
        .collect();
    out.sort();
    out
}

pub(super) fn plan(
    desired: &ResourceRecord,
    children: &[ResourceRecord],
    nodes: &[ResourceRecord],
) -> Result<Vec<Batch>, ValidationError> {
    let spec: DaemonSetSpec = desired.spec_as()?;
    let eligible = eligible_nodes(&spec, nodes);
    let max_unavailable = spec
        .max_unavailable(eligible.len() as i64)
        .map_err(|e| ValidationError::new("spec.updateStrategy.rollingUpdate.maxUnavailable", e))?
        as usize;
    let on_delete = spec.update_strategy.strategy_type == UpdateStrategyType::OnDelete;

    let template = pods::template_of(&desired.spec);
    let revision = pods::template_hash(&template);

    let mut batches: Vec<Batch> = Vec::new();
    let mut members: BTreeMap<String, Member> = BTreeMap::new();
    let mut strays = Vec::new();
    for pod in children.iter().filter(|c| c.kind() == ResourceKind::Pod) {
        let member = Member {
            identity: pod.identity.clone(),
            current: pod.label(CONTROLLER_REVISION) == Some(revision.as_str()),
            available: pods::is_available(pod),
        };
        match node_of(pod) {
            Some(node) if eligible.contains(&node) && !members.contains_key(&node) => {
                members.insert(node, member);
            }
            _ => strays.push(member.identity),
        }
    }
    batches.push(strays.into_iter().map(Action::delete).collect());

    let create_for = |node: &str| -> Action {
        let mut pod = pods::pod_from_template(
            desired,
            &format!("{}-{}", desired.name(), node),
            &template,
            &[(CONTROLLER_REVISION, revision.as_str())],
        );
        if let Value::Object(map) = &mut pod.spec {
            map.insert("nodeName".to_string(), Value::String(node.to_string()));
        }
        Action::Create { record: pod }
    };

    let bound = 2 * eligible.len() + 4;
    for _ in 0..bound {
        let missing: Vec<&String> = eligible.iter().filter(|n| !members.contains_key(*n)).collect();
        if !missing.is_empty() {
            let mut batch = Vec::with_capacity(missing.len());
            for node in missing {
                batch.push(create_for(node));
                members.insert(
                    node.clone(),
                    Member {
                        identity: desired
                            .identity
                            .sibling(ResourceKind::Pod, format!("{}-{}", desired.name(), node)),
                        current: true,
                        available: true,
                    },
                );
            }
            batches.push(batch);
            continue;
        }

        if on_delete {
            break;
        }
        let down = members.values().filter(|m| !m.available).count();
        let (down_stale, up_stale): (Vec<_>, Vec<_>) = members
            .iter()
            .filter(|(_, m)| !m.current)
            .partition(|(_, m)| !m.available);
        if down_stale.is_empty() && up_stale.is_empty() {
            break;
        }
        // Stale pods that are already down go without spending budget.
        let budget = max_unavailable.saturating_sub(down);
        let victims: Vec<String> = down_stale
            .into_iter()
            .chain(up_stale.into_iter().take(budget))
            .map(|(node, _)| node.clone())
            .collect();
        if victims.is_empty() {
            break;
        }
        let batch = victims
            .iter()
            .filter_map(|n| members.remove(n))
            .map(|m| Action::delete(m.identity))
            .collect();
        batches.push(batch);
    }

    Ok(batches.into_iter().filter(|b| !b.is_empty()).collect())
}
