//! Deployment pods: scaling, rolling updates and recreate.
//!
//! Pods are owned directly by the Deployment and carry
//! `pod-template-hash`; a pod whose hash differs from the current template
//! is old. The planner simulates the population forward batch by batch,
//! assuming each created pod becomes available once its batch completes.
//!
//! Rolling-update bounds, with `R` replicas:
//! - total pods never exceed `R + maxSurge`;
//! - available pods never drop below `R - maxUnavailable`;
//! - total pods never drop below `R` while surge room exists, or below
//!   `R - maxUnavailable` when `maxSurge` is zero.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::pods::{self, POD_TEMPLATE_HASH};
use super::{Action, Batch};
use crate::model::spec::{DeploymentSpec, DeploymentStrategyType};
use crate::model::{ResourceIdentity, ResourceKind, ResourceRecord, ValidationError};

#[derive(Debug, Clone)]
struct Member {
    identity: ResourceIdentity,
    current: bool,
    available: bool,
    /// None for pods this plan creates.
    created: Option<DateTime<Utc>>,
}

impl Member {
    /// Newer first; pods not yet created count as newest.
    fn newer_first(&self, other: &Self) -> Ordering {
        (other.created.is_none(), other.created).cmp(&(self.created.is_none(), self.created))
    }
}

struct Rollout<'a> {
    owner: &'a ResourceRecord,
    template: Value,
    hash: String,
    members: Vec<Member>,
    used_names: BTreeSet<String>,
    batches: Vec<Batch>,
}

impl<'a> Rollout<'a> {
    fn new(owner: &'a ResourceRecord, children: &[ResourceRecord]) -> Self {
        let template = pods::template_of(&owner.spec);
        let hash = pods::template_hash(&template);
        let existing: Vec<&ResourceRecord> = children
            .iter()
            .filter(|c| c.kind() == ResourceKind::Pod)
            .collect();
        let used_names = existing.iter().map(|p| p.name().to_string()).collect();
        let members = existing
            .iter()
            .map(|p| Member {
                identity: p.identity.clone(),
                current: p.label(POD_TEMPLATE_HASH) == Some(hash.as_str()),
                available: pods::is_available(p),
                created: p.creation_timestamp,
            })
            .collect();
        let mut rollout = Self {
            owner,
            template,
            hash,
            members,
            used_names,
            batches: Vec::new(),
        };
        rollout.sort();
        rollout
    }

    fn sort(&mut self) {
        self.members.sort_by(|a, b| a.identity.cmp(&b.identity));
    }

    fn count(&self, current: bool) -> i64 {
        self.members.iter().filter(|m| m.current == current).count() as i64
    }

    fn total(&self) -> i64 {
        self.members.len() as i64
    }

    fn available(&self) -> i64 {
        self.members.iter().filter(|m| m.available).count() as i64
    }

    fn create(&mut self, n: i64) {
        let prefix = format!("{}-{}", self.owner.name(), self.hash);
        let names = pods::next_free_names(&prefix, &self.used_names, n.max(0) as usize);
        let mut batch = Vec::with_capacity(names.len());
        for name in names {
            let pod = pods::pod_from_template(
                self.owner,
                &name,
                &self.template,
                &[(POD_TEMPLATE_HASH, self.hash.as_str())],
            );
            self.used_names.insert(name);
            self.members.push(Member {
                identity: pod.identity.clone(),
                current: true,
                available: true,
                created: None,
            });
            batch.push(Action::Create { record: pod });
        }
        self.sort();
        self.batches.push(batch);
    }

    fn delete(&mut self, victims: Vec<ResourceIdentity>) {
        self.members.retain(|m| !victims.contains(&m.identity));
        self.batches
            .push(victims.into_iter().map(Action::delete).collect());
    }

    /// Pick `n` members matching `filter`, unavailable ones first, then
    /// the most recently created.
    fn pick(&self, n: i64, filter: impl Fn(&Member) -> bool) -> Vec<ResourceIdentity> {
        let mut candidates: Vec<&Member> = self.members.iter().filter(|m| filter(m)).collect();
        candidates.sort_by(|a, b| a.available.cmp(&b.available).then_with(|| a.newer_first(b)));
        candidates
            .into_iter()
            .take(n.max(0) as usize)
            .map(|m| m.identity.clone())
            .collect()
    }

    /// Bring the current revision to exactly `replicas` once no old pods
    /// remain.
    fn settle(&mut self, replicas: i64) -> bool {
        let current = self.count(true);
        if current < replicas {
            self.create(replicas - current);
            true
        } else if current > replicas {
            let victims = self.pick(current - replicas, |m| m.current);
            self.delete(victims);
            true
        } else {
            false
        }
    }

    fn recreate(mut self, replicas: i64) -> Vec<Batch> {
        let old = self.pick(self.count(false), |m| !m.current);
        if !old.is_empty() {
            self.delete(old);
        }
        self.settle(replicas);
        self.batches
    }

    fn rolling(mut self, replicas: i64, max_surge: i64, max_unavailable: i64) -> Vec<Batch> {
        let min_available = (replicas - max_unavailable).max(0);
        let max_total = replicas + max_surge;
        let min_total = if max_surge > 0 { replicas } else { min_available };

        let bound = 4 * (replicas + self.total()) + 8;
        for _ in 0..bound {
            let old = self.count(false);
            let current = self.count(true);
            let total = self.total();

            if old == 0 {
                if !self.settle(replicas) {
                    break;
                }
                continue;
            }

            if current < replicas && total < max_total {
                let n = (replicas - current).min(max_total - total);
                self.create(n);
                continue;
            }

            // Unavailable old pods contribute nothing; removing them frees
            // surge room without touching availability.
            let broken: Vec<_> = self
                .members
                .iter()
                .filter(|m| !m.current && !m.available)
                .map(|m| m.identity.clone())
                .collect();
            if !broken.is_empty() {
                self.delete(broken);
                continue;
            }

            let k = old
                .min(self.available() - min_available)
                .min(total - min_total);
            if k > 0 {
                let victims = self.pick(k, |m| !m.current);
                self.delete(victims);
                continue;
            }

            // Waiting on new pods to become available.
            break;
        }
        self.batches
    }
}

pub(super) fn plan(
    desired: &ResourceRecord,
    children: &[ResourceRecord],
) -> Result<Vec<Batch>, ValidationError> {
    let spec: DeploymentSpec = desired.spec_as()?;
    if spec.paused {
        return Ok(Vec::new());
    }
    let replicas = spec.replicas.max(0);
    let rollout = Rollout::new(desired, children);
    let batches = match spec.strategy.strategy_type {
        DeploymentStrategyType::Recreate => rollout.recreate(replicas),
        DeploymentStrategyType::RollingUpdate => {
            let bounds = spec
                .rollout_bounds()
                .map_err(|e| ValidationError::new("spec.strategy.rollingUpdate", e))?;
            rollout.rolling(replicas, bounds.max_surge, bounds.max_unavailable)
        }
    };
    Ok(batches.into_iter().filter(|b| !b.is_empty()).collect())
}
