//! StatefulSet pods: stable ordinals, ordered start and reverse termination.
//!
//! Pod `{set}-{n}` is created only after every lower ordinal is available
//! (OrderedReady), one per batch. Scale-down and rolling replacement go
//! from the highest ordinal down, one per batch. `Parallel` lifts the
//! ordering for creation and scale-down but still replaces one pod at a
//! time. Each ordinal's claims (`{template}-{set}-{n}`) are created with
//! or before its pod and are never deleted by the planner.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::pods::{self, CONTROLLER_REVISION, STATEFULSET_POD_NAME};
use super::{Action, Batch};
use crate::model::spec::{PodManagementPolicy, StatefulSetSpec, UpdateStrategyType};
use crate::model::{ResourceIdentity, ResourceKind, ResourceRecord, ValidationError};

#[derive(Debug, Clone)]
struct Member {
    identity: ResourceIdentity,
    current: bool,
    available: bool,
}

struct OrdinalSet<'a> {
    owner: &'a ResourceRecord,
    template: Value,
    revision: String,
    claim_templates: Vec<(String, Value)>,
    members: BTreeMap<usize, Member>,
    claims: BTreeSet<String>,
    batches: Vec<Batch>,
}

impl<'a> OrdinalSet<'a> {
    fn claim_name(&self, template: &str, ordinal: usize) -> String {
        format!("{}-{}-{}", template, self.owner.name(), ordinal)
    }

    fn pod_name(&self, ordinal: usize) -> String {
        format!("{}-{}", self.owner.name(), ordinal)
    }

    /// Claims (if missing) and the pod for one ordinal.
    fn create_actions(&mut self, ordinal: usize) -> Vec<Action> {
        let mut actions = Vec::new();
        for (tmpl_name, tmpl) in self.claim_templates.clone() {
            let claim_name = self.claim_name(&tmpl_name, ordinal);
            if self.claims.insert(claim_name.clone()) {
                actions.push(Action::Create {
                    record: pods::claim_from_template(self.owner, &claim_name, &tmpl),
                });
            }
        }
        let name = self.pod_name(ordinal);
        let pod = pods::pod_from_template(
            self.owner,
            &name,
            &self.template,
            &[
                (CONTROLLER_REVISION, self.revision.as_str()),
                (STATEFULSET_POD_NAME, name.as_str()),
            ],
        );
        self.members.insert(
            ordinal,
            Member {
                identity: pod.identity.clone(),
                current: true,
                available: true,
            },
        );
        actions.push(Action::Create { record: pod });
        actions
    }

    fn delete_ordinals(&mut self, ordinals: &[usize]) {
        let batch = ordinals
            .iter()
            .filter_map(|o| self.members.remove(o))
            .map(|m| Action::delete(m.identity))
            .collect();
        self.batches.push(batch);
    }

    fn all_available_below(&self, ordinal: usize) -> bool {
        self.members.range(..ordinal).all(|(_, m)| m.available)
    }
}

pub(super) fn plan(
    desired: &ResourceRecord,
    children: &[ResourceRecord],
) -> Result<Vec<Batch>, ValidationError> {
    let spec: StatefulSetSpec = desired.spec_as()?;
    let replicas = spec.replicas.max(0) as usize;
    let partition = spec.partition().max(0) as usize;
    let parallel = spec.pod_management_policy == PodManagementPolicy::Parallel;
    let on_delete = spec.update_strategy.strategy_type == UpdateStrategyType::OnDelete;

    let template = pods::template_of(&desired.spec);
    let revision = pods::template_hash(&template);
    let claim_templates = spec
        .volume_claim_templates
        .iter()
        .map(|t| {
            let name = t.metadata.name.clone().unwrap_or_default();
            let raw = serde_json::json!({
                "metadata": {"labels": t.metadata.labels},
                "spec": t.spec,
            });
            (name, raw)
        })
        .collect();

    let mut strays = Vec::new();
    let mut members = BTreeMap::new();
    let mut claims = BTreeSet::new();
    for child in children {
        match child.kind() {
            ResourceKind::Pod => match pods::parse_ordinal(desired.name(), child.name()) {
                Some(ordinal) => {
                    members.insert(
                        ordinal,
                        Member {
                            identity: child.identity.clone(),
                            current: child.label(CONTROLLER_REVISION) == Some(revision.as_str()),
                            available: pods::is_available(child),
                        },
                    );
                }
                None if child.is_owned_by(&desired.identity) => strays.push(child.identity.clone()),
                None => {}
            },
            ResourceKind::PersistentVolumeClaim => {
                claims.insert(child.name().to_string());
            }
            _ => {}
        }
    }

    let mut set = OrdinalSet {
        owner: desired,
        template,
        revision,
        claim_templates,
        members,
        claims,
        batches: Vec::new(),
    };
    if !strays.is_empty() {
        set.batches
            .push(strays.into_iter().map(Action::delete).collect());
    }

    let bound = 4 * (replicas + set.members.len()) + 8;
    for _ in 0..bound {
        let excess: Vec<usize> = set
            .members
            .range(replicas..)
            .map(|(o, _)| *o)
            .rev()
            .collect();
        if !excess.is_empty() {
            if parallel {
                set.delete_ordinals(&excess);
            } else {
                set.delete_ordinals(&excess[..1]);
            }
            continue;
        }

        let missing: Vec<usize> = (0..replicas)
            .filter(|o| !set.members.contains_key(o))
            .collect();
        if !missing.is_empty() {
            if parallel {
                let batch = missing
                    .iter()
                    .flat_map(|o| set.create_actions(*o))
                    .collect::<Vec<_>>();
                set.batches.push(batch);
                continue;
            }
            let next = missing[0];
            if !set.all_available_below(next) {
                break;
            }
            let batch = set.create_actions(next);
            set.batches.push(batch);
            continue;
        }

        if on_delete {
            break;
        }
        let stale = set
            .members
            .range(partition..)
            .rev()
            .find(|(_, m)| !m.current)
            .map(|(o, _)| *o);
        match stale {
            Some(ordinal) if set.members.values().all(|m| m.available) => {
                set.delete_ordinals(&[ordinal]);
            }
            _ => break,
        }
    }

    Ok(set.batches.into_iter().filter(|b| !b.is_empty()).collect())
}
