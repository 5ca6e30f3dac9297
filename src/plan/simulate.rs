//! Dry-run of a plan against a pod population.
//!
//! Within a batch any interleaving is possible, so each batch reports the
//! worst case on both sides: deletions landing before creations
//! (`min_total`), creations landing before deletions (`max_total`), and
//! availability with every deleted pod gone and no created pod ready yet
//! (`min_available`). Created pods are assumed ready once their batch ends.

use std::collections::BTreeMap;

use super::pods;
use super::{Action, ActionPlan};
use crate::model::{ResourceIdentity, ResourceKind, ResourceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEffect {
    pub index: usize,
    pub min_total: usize,
    pub max_total: usize,
    pub min_available: usize,
    pub total_after: usize,
    pub available_after: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Simulation {
    pub effects: Vec<BatchEffect>,
    /// Pod population after the last batch, ordered by identity.
    pub pods: Vec<ResourceRecord>,
}

impl Simulation {
    /// Every batch kept the pod count within `[low, high]`.
    pub fn total_within(&self, low: usize, high: usize) -> bool {
        self.effects
            .iter()
            .all(|e| e.min_total >= low && e.max_total <= high)
    }

    /// Lowest availability seen in any batch.
    pub fn min_available(&self) -> Option<usize> {
        self.effects.iter().map(|e| e.min_available).min()
    }
}

impl ActionPlan {
    /// Replay the plan's pod actions over `initial` (non-pod records are
    /// ignored).
    pub fn simulate(&self, initial: &[ResourceRecord]) -> Simulation {
        let mut population: BTreeMap<ResourceIdentity, ResourceRecord> = initial
            .iter()
            .filter(|r| r.kind() == ResourceKind::Pod)
            .map(|r| (r.identity.clone(), r.clone()))
            .collect();
        let available = |pop: &BTreeMap<ResourceIdentity, ResourceRecord>| {
            pop.values().filter(|p| pods::is_available(p)).count()
        };

        let mut effects = Vec::with_capacity(self.batches.len());
        for (index, batch) in self.batches.iter().enumerate() {
            let before_total = population.len();
            let before_available = available(&population);

            let mut created = Vec::new();
            let mut deleted = 0usize;
            let mut deleted_available = 0usize;
            for action in batch {
                match action {
                    Action::Create { record } | Action::Update { record, .. }
                        if record.kind() == ResourceKind::Pod =>
                    {
                        if !population.contains_key(&record.identity) {
                            created.push(record.clone());
                        }
                    }
                    Action::Delete { identity, .. } if identity.kind == ResourceKind::Pod => {
                        if let Some(pod) = population.remove(identity) {
                            deleted += 1;
                            if pods::is_available(&pod) {
                                deleted_available += 1;
                            }
                        }
                    }
                    _ => {}
                }
            }

            let max_total = before_total + created.len();
            for mut pod in created {
                pod.status = pods::ready_status();
                population.insert(pod.identity.clone(), pod);
            }

            effects.push(BatchEffect {
                index,
                min_total: before_total - deleted,
                max_total,
                min_available: before_available - deleted_available,
                total_after: population.len(),
                available_after: available(&population),
            });
        }

        Simulation {
            effects,
            pods: population.into_values().collect(),
        }
    }
}
