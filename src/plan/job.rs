//! Job pods: run to `completions` with at most `parallelism` active.
//!
//! Terminal pods are kept as history. Once the job has succeeded, or failed
//! more than `backoffLimit` times, any remaining active pods are removed and
//! nothing new is started.

use std::collections::BTreeSet;

use super::pods;
use super::{Action, Batch};
use crate::model::spec::{JobSpec, PodPhase};
use crate::model::{ResourceKind, ResourceRecord, ValidationError};

/// Pod phase tally for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub active: i64,
    pub succeeded: i64,
    pub failed: i64,
}

pub fn count_pods(children: &[ResourceRecord]) -> JobCounts {
    let mut counts = JobCounts::default();
    for pod in children.iter().filter(|c| c.kind() == ResourceKind::Pod) {
        match pods::pod_status(pod).phase {
            PodPhase::Succeeded => counts.succeeded += 1,
            PodPhase::Failed => counts.failed += 1,
            _ => counts.active += 1,
        }
    }
    counts
}

pub(super) fn plan(
    desired: &ResourceRecord,
    children: &[ResourceRecord],
) -> Result<Vec<Batch>, ValidationError> {
    let spec: JobSpec = desired.spec_as()?;
    let counts = count_pods(children);
    let job_pods: Vec<&ResourceRecord> = children
        .iter()
        .filter(|c| c.kind() == ResourceKind::Pod)
        .collect();

    let finished = counts.succeeded >= spec.completions() || counts.failed > spec.backoff_limit();
    if finished {
        let active: Batch = job_pods
            .iter()
            .filter(|p| !pods::pod_status(p).is_terminal())
            .map(|p| Action::delete(p.identity.clone()))
            .collect();
        return Ok(if active.is_empty() { vec![] } else { vec![active] });
    }

    let want = spec
        .parallelism()
        .min(spec.completions() - counts.succeeded)
        .max(0);
    if counts.active >= want {
        return Ok(Vec::new());
    }

    let used: BTreeSet<String> = job_pods.iter().map(|p| p.name().to_string()).collect();
    let template = pods::template_of(&desired.spec);
    let batch = pods::next_free_names(desired.name(), &used, (want - counts.active) as usize)
        .into_iter()
        .map(|name| Action::Create {
            record: pods::pod_from_template(desired, &name, &template, &[("job-name", desired.name())]),
        })
        .collect();
    Ok(vec![batch])
}
