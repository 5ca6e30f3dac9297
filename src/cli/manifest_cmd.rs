//! Manifest CLI subcommands: `validate FILE` and `plan DESIRED [OBSERVED]`.
//!
//! Both run offline against files; nothing is applied.

use std::path::Path;

use serde::Serialize;

use crate::model::{Manifest, ResourceKind, ResourceRecord};
use crate::plan::{self, pods::RETAINED_BY, ActionPlan, Observed};

/// Parse and admit every document in `path` (a file or a directory).
///
/// Returns 0 when every manifest is valid, 1 otherwise.
pub fn run_validate(path: &Path) -> i32 {
    let manifests = match Manifest::load_path(path) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return 1;
        }
    };
    let mut failures = 0;
    for manifest in &manifests {
        match manifest.validate() {
            Ok(()) => println!("ok       {}", manifest.identity),
            Err(e) => {
                println!("invalid  {}: {}", manifest.identity, e);
                failures += 1;
            }
        }
    }
    if failures == 0 {
        println!("{} manifest(s) valid.", manifests.len());
        0
    } else {
        eprintln!("{} of {} manifest(s) invalid", failures, manifests.len());
        1
    }
}

#[derive(Debug, Serialize)]
struct PlanEntry {
    identity: String,
    actions: usize,
    plan: ActionPlan,
}

/// Print the plan for every desired manifest against an optional observed
/// fixture as pretty JSON.
pub fn run_plan(desired: &Path, observed: Option<&Path>) -> i32 {
    match plan_files(desired, observed).and_then(|entries| {
        serde_json::to_string_pretty(&entries).map_err(|e| e.to_string())
    }) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            1
        }
    }
}

fn plan_files(desired: &Path, observed: Option<&Path>) -> Result<Vec<PlanEntry>, String> {
    let desired = Manifest::load_path(desired).map_err(|e| e.to_string())?;
    let observed: Vec<ResourceRecord> = match observed {
        Some(path) => Manifest::load_path(path)
            .map_err(|e| e.to_string())?
            .iter()
            .map(Manifest::to_record)
            .collect(),
        None => Vec::new(),
    };

    let mut entries = Vec::with_capacity(desired.len());
    for manifest in &desired {
        manifest
            .validate()
            .map_err(|e| format!("{}: {}", manifest.identity, e))?;
        let record = manifest.to_record();
        let view = observed_view(&record, &observed);
        let plan = plan::plan(Some(&record), &view);
        entries.push(PlanEntry {
            identity: manifest.identity.to_string(),
            actions: plan.action_count(),
            plan,
        });
    }
    Ok(entries)
}

/// What a reconciler would observe for `desired` if `records` were the
/// live cluster.
fn observed_view(desired: &ResourceRecord, records: &[ResourceRecord]) -> Observed {
    let identity = &desired.identity;
    let object = records.iter().find(|r| &r.identity == identity).cloned();
    let children = records
        .iter()
        .filter(|r| {
            r.is_owned_by(identity)
                || (identity.kind == ResourceKind::StatefulSet
                    && r.kind() == ResourceKind::PersistentVolumeClaim
                    && r.namespace() == identity.namespace
                    && r.label(RETAINED_BY) == Some(identity.name.as_str()))
        })
        .cloned()
        .collect();
    let nodes = if identity.kind == ResourceKind::DaemonSet {
        records
            .iter()
            .filter(|r| r.kind() == ResourceKind::Node)
            .cloned()
            .collect()
    } else {
        Vec::new()
    };
    Observed {
        object,
        children,
        nodes,
    }
}
