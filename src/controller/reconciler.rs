//! One level-triggered reconciliation pass per identity.
//!
//! Each pass reads the freshest desired record and observed snapshot,
//! plans from scratch, runs only the first batch, and writes status. The
//! caller requeues while batches remain; watch events on the touched
//! objects also bring the identity back.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::error::ReconcileError;
use super::status::{self, Condition, PassSummary, DEGRADED};
use crate::backend::StateBackend;
use crate::cache::ObservedCache;
use crate::model::{ResourceIdentity, ResourceKind, ResourceRecord};
use crate::plan::pods::{self, RETAINED_BY};
use crate::plan::{self, Action, ActionPlan, Observed, Rejection};
use crate::store::{DesiredStateStore, CONTROLLER_FINALIZER};
use crate::telemetry;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Consecutive failures before an identity is marked Degraded.
    pub max_failures: u32,
    /// Delay before running the next batch of a multi-batch plan.
    pub rollout_requeue: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            rollout_requeue: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Nothing to do; status is current.
    Converged,
    /// A batch ran; `remaining` more batches were planned behind it.
    Progressing { executed: usize, remaining: usize },
    /// The plan refused to act. Surfaced in status, not retried with backoff.
    Rejected(Rejection),
    /// Teardown finished and the controller finalizer was released.
    Finalized,
}

pub struct Reconciler {
    desired: Arc<DesiredStateStore>,
    cache: Arc<ObservedCache>,
    backend: Arc<dyn StateBackend>,
    config: ReconcilerConfig,
    degraded: DashMap<ResourceIdentity, String>,
}

impl Reconciler {
    pub fn new(
        desired: Arc<DesiredStateStore>,
        cache: Arc<ObservedCache>,
        backend: Arc<dyn StateBackend>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            desired,
            cache,
            backend,
            config,
            degraded: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Observed object plus everything its plan depends on.
    ///
    /// Owned records that have a desired record of their own are left out:
    /// they converge through their own pass and through garbage collection.
    pub fn observe(&self, identity: &ResourceIdentity) -> Observed {
        let object = self.cache.get(identity).map(|r| ResourceRecord::clone(&r));
        let mut children: Vec<ResourceRecord> = self
            .cache
            .owned_by(identity)
            .iter()
            .filter(|r| !self.desired.contains(&r.identity))
            .map(|r| ResourceRecord::clone(r))
            .collect();
        if identity.kind == ResourceKind::StatefulSet {
            children.extend(
                self.cache
                    .list_namespace(ResourceKind::PersistentVolumeClaim, &identity.namespace)
                    .iter()
                    .filter(|c| c.label(RETAINED_BY) == Some(identity.name.as_str()))
                    .map(|r| ResourceRecord::clone(r)),
            );
        }
        let nodes = if identity.kind == ResourceKind::DaemonSet {
            self.cache
                .list(ResourceKind::Node)
                .iter()
                .map(|r| ResourceRecord::clone(r))
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

    fn desired_record(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<Option<ResourceRecord>, ReconcileError> {
        match self.desired.get(identity) {
            Ok(record) => Ok(Some(record)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// The full plan the next pass would start from. Read-only.
    pub fn plan_for(&self, identity: &ResourceIdentity) -> Result<ActionPlan, ReconcileError> {
        let desired = self.desired_record(identity)?;
        Ok(plan::plan(desired.as_ref(), &self.observe(identity)))
    }

    pub async fn reconcile(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let desired = self.desired_record(identity)?;
        let observed = self.observe(identity);
        let plan = plan::plan(desired.as_ref(), &observed);

        if let Some(reason) = plan.rejection() {
            warn!(resource = %identity, reason = %reason, "Plan rejected");
            if let Some(desired) = &desired {
                let pass = PassSummary {
                    rejection: Some(reason),
                    ..PassSummary::default()
                };
                self.write_status(desired, &observed, pass)?;
            }
            return Ok(ReconcileOutcome::Rejected(reason.clone()));
        }

        let Some(batch) = plan.first_batch() else {
            return self.converged(identity, desired.as_ref(), &observed);
        };

        debug!(
            resource = %identity,
            batches = plan.batches.len(),
            actions = batch.len(),
            "Executing first batch"
        );
        let executed = self.execute(batch).await?;
        let remaining = plan.batches.len() - 1;

        if let Some(desired) = desired.as_ref().filter(|d| !d.is_finalizing()) {
            let pass = PassSummary {
                pending_batches: remaining,
                executed,
                ..PassSummary::default()
            };
            self.write_status(desired, &observed, pass)?;
        }
        Ok(ReconcileOutcome::Progressing {
            executed,
            remaining,
        })
    }

    fn converged(
        &self,
        identity: &ResourceIdentity,
        desired: Option<&ResourceRecord>,
        observed: &Observed,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(desired) = desired else {
            return Ok(ReconcileOutcome::Converged);
        };
        if desired.is_finalizing() {
            // Object and owned children are gone.
            if desired.finalizers.contains(CONTROLLER_FINALIZER) {
                match self.desired.remove_finalizer(identity, CONTROLLER_FINALIZER) {
                    Ok(_) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err.into()),
                }
                info!(resource = %identity, "Teardown complete, finalizer released");
            }
            return Ok(ReconcileOutcome::Finalized);
        }
        self.write_status(desired, observed, PassSummary::default())?;
        Ok(ReconcileOutcome::Converged)
    }

    /// Run one batch concurrently. Every action is attempted; the first
    /// failure is reported.
    async fn execute(&self, batch: &[Action]) -> Result<usize, ReconcileError> {
        let results = join_all(batch.iter().map(|action| self.apply_action(action))).await;
        let mut executed = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(()) => executed += 1,
                Err(err) => {
                    warn!(error = %err, "Action failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(executed),
        }
    }

    async fn apply_action(&self, action: &Action) -> Result<(), ReconcileError> {
        let result = match action {
            Action::Create { record } => self
                .backend
                .write(&record.identity, record.clone(), None)
                .await
                .map(|_| ()),
            Action::Update { record, expected } => self
                .backend
                .write(&record.identity, record.clone(), *expected)
                .await
                .map(|_| ()),
            Action::Delete { identity, expected } => {
                match self.backend.delete(identity, *expected).await {
                    // Already gone: a previous pass or another actor got there first.
                    Err(err) if err.is_not_found() => Ok(()),
                    other => other,
                }
            }
            Action::Reject { .. } => Ok(()),
        };
        if result.is_ok() {
            debug!(action = %action, "Applied");
        }
        result.map_err(|source| ReconcileError::ActionExecution {
            identity: action.identity().clone(),
            verb: action.verb(),
            source,
        })
    }

    fn write_status(
        &self,
        desired: &ResourceRecord,
        observed: &Observed,
        mut pass: PassSummary<'_>,
    ) -> Result<(), ReconcileError> {
        if desired.kind() == ResourceKind::Service {
            pass.endpoints = Some(self.endpoints(desired));
        }
        let status = status::synthesize(desired, observed, &pass, Utc::now());
        if status == desired.status {
            return Ok(());
        }
        match self.desired.update_status(&desired.identity, status, None) {
            Ok(_) => Ok(()),
            // Purged while we were working; the next trigger sees it gone.
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Ready pods selected by a Service, computed on read.
    fn endpoints(&self, service: &ResourceRecord) -> Vec<String> {
        let selector = status::service_selector(service);
        self.cache
            .select(ResourceKind::Pod, service.namespace(), &selector)
            .iter()
            .filter(|p| pods::is_available(p))
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Note a failed pass. Past the threshold the identity is Degraded and
    /// the condition is written to its status; retries continue regardless.
    /// Returns whether the identity is Degraded.
    pub fn record_failure(
        &self,
        identity: &ResourceIdentity,
        err: &ReconcileError,
        failures: u32,
    ) -> bool {
        if failures < self.config.max_failures {
            return false;
        }
        let message = err.to_string();
        if self
            .degraded
            .insert(identity.clone(), message.clone())
            .is_none()
        {
            warn!(resource = %identity, failures, error = %message, "Marking resource Degraded");
        }
        if let Ok(record) = self.desired.get(identity) {
            if !record.is_finalizing() {
                let status = status::with_condition(
                    &record.status,
                    Condition::new(DEGRADED, true, "ReconcileFailed", message, Utc::now()),
                );
                if let Err(e) = self.desired.update_status(identity, status, None) {
                    debug!(resource = %identity, error = %e, "Could not record Degraded condition");
                }
            }
        }
        telemetry::record_degraded(self.degraded.len());
        true
    }

    /// Clear Degraded after a successful pass.
    pub fn record_success(&self, identity: &ResourceIdentity) {
        if self.degraded.remove(identity).is_some() {
            info!(resource = %identity, "Resource recovered");
            telemetry::record_degraded(self.degraded.len());
        }
    }

    pub fn is_degraded(&self, identity: &ResourceIdentity) -> bool {
        self.degraded.contains_key(identity)
    }

    pub fn degraded_count(&self) -> usize {
        self.degraded.len()
    }

    /// Degraded identities with their last error, ordered by identity.
    pub fn degraded(&self) -> Vec<(ResourceIdentity, String)> {
        let mut out: Vec<_> = self
            .degraded
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
