//! Sequential plan execution against a storage backend.
//!
//! The runner walks a [`Plan`] in order, resolves every referenced resource to
//! the backend handle created earlier in the same run, and stops at the first
//! failing step. Resources created before the failure are left in place.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::error::{RunError, StepError};
use crate::operation::{Operation, Plan, Step, VolumeSize};
use crate::trace::RunTrace;

/// Storage operations a plan can be replayed against.
///
/// Handles are opaque to the runner; it only stores them by name and passes
/// them back on later calls.
pub trait Backend {
    type Volume;
    type Snapshot;

    fn create_volume(&self, name: &str) -> anyhow::Result<Self::Volume>;

    fn attach_consumer(&self, consumer: &str, volume: &Self::Volume) -> anyhow::Result<()>;

    fn create_snapshot(&self, name: &str, volume: &Self::Volume)
        -> anyhow::Result<Self::Snapshot>;

    /// Create a volume from `snapshot`, optionally at a new size.
    fn restore_from_snapshot(
        &self,
        name: &str,
        snapshot: &Self::Snapshot,
        size: Option<VolumeSize>,
    ) -> anyhow::Result<Self::Volume>;

    /// Create a volume from `source`, optionally at a new size.
    fn clone_volume(
        &self,
        name: &str,
        source: &Self::Volume,
        size: Option<VolumeSize>,
    ) -> anyhow::Result<Self::Volume>;

    fn delete_volume(&self, volume: Self::Volume) -> anyhow::Result<()>;

    fn delete_snapshot(&self, snapshot: Self::Snapshot) -> anyhow::Result<()>;

    fn resize_volume(&self, volume: &Self::Volume, size: VolumeSize) -> anyhow::Result<()>;
}

/// Handles created during one run, keyed by plan name.
///
/// A creation that reuses a tracked name replaces the earlier handle; the
/// earlier resource stays in the backend but the run can no longer reach it.
#[derive(Debug, Clone)]
pub struct RuntimeState<V, S> {
    volumes: BTreeMap<String, V>,
    snapshots: BTreeMap<String, S>,
    consumers: BTreeMap<String, String>,
}

impl<V, S> Default for RuntimeState<V, S> {
    fn default() -> Self {
        Self {
            volumes: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            consumers: BTreeMap::new(),
        }
    }
}

impl<V, S> RuntimeState<V, S> {
    pub fn volume(&self, name: &str) -> Result<&V, StepError> {
        self.volumes
            .get(name)
            .ok_or_else(|| StepError::stale("volume", name))
    }

    pub fn snapshot(&self, name: &str) -> Result<&S, StepError> {
        self.snapshots
            .get(name)
            .ok_or_else(|| StepError::stale("snapshot", name))
    }

    pub fn volume_names(&self) -> impl Iterator<Item = &str> {
        self.volumes.keys().map(String::as_str)
    }

    pub fn snapshot_names(&self) -> impl Iterator<Item = &str> {
        self.snapshots.keys().map(String::as_str)
    }

    /// Volume a consumer was attached to.
    pub fn consumer_volume(&self, consumer: &str) -> Option<&str> {
        self.consumers.get(consumer).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty() && self.snapshots.is_empty() && self.consumers.is_empty()
    }
}

/// Result of a plan that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub fingerprint: String,
    pub steps: usize,
}

pub struct PlanRunner<'b, B: Backend> {
    backend: &'b B,
    run_id: String,
    state: RuntimeState<B::Volume, B::Snapshot>,
    trace: RunTrace,
}

impl<'b, B: Backend> PlanRunner<'b, B> {
    pub fn new(backend: &'b B, run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        Self {
            backend,
            trace: RunTrace::new(run_id.clone(), ""),
            run_id,
            state: RuntimeState::default(),
        }
    }

    pub fn state(&self) -> &RuntimeState<B::Volume, B::Snapshot> {
        &self.state
    }

    pub fn trace(&self) -> &RunTrace {
        &self.trace
    }

    pub fn into_trace(self) -> RunTrace {
        self.trace
    }

    /// Execute `plan` from an empty runtime state, stopping at the first failure.
    pub fn run(&mut self, plan: &Plan) -> Result<RunSummary, RunError> {
        let fingerprint = plan.fingerprint();
        self.state = RuntimeState::default();
        self.trace = RunTrace::new(self.run_id.clone(), fingerprint.clone());

        info!(
            run_id = %self.run_id,
            plan = %fingerprint,
            steps = plan.len(),
            "starting plan"
        );

        for (index, op) in plan.iter().enumerate() {
            self.trace.step_started(index, &op.op);
            info!(run_id = %self.run_id, step = index, "{op}");

            if let Err(source) = self.run_step(op) {
                self.trace.step_finished(index, false);
                let err = RunError {
                    index,
                    op: op.op.clone(),
                    source,
                };
                let message = err.chain();
                warn!(run_id = %self.run_id, step = index, "{message}");
                self.trace.run_failed(&message);
                self.trace.run_finished(false);
                return Err(err);
            }

            self.trace.step_finished(index, true);
        }

        self.trace.run_finished(true);
        info!(run_id = %self.run_id, plan = %fingerprint, "plan finished");

        Ok(RunSummary {
            run_id: self.run_id.clone(),
            fingerprint,
            steps: plan.len(),
        })
    }

    fn run_step(&mut self, op: &Operation) -> Result<(), StepError> {
        let step = Step::parse(op)?;
        let backend = self.backend;

        match step {
            Step::CreateVolume { volume } => {
                let handle = backend
                    .create_volume(&volume)
                    .map_err(StepError::Backend)?;
                self.track_volume(volume, handle);
            }
            Step::AttachConsumer { consumer, volume } => {
                let handle = self.state.volume(&volume)?;
                backend
                    .attach_consumer(&consumer, handle)
                    .map_err(StepError::Backend)?;
                self.state.consumers.insert(consumer, volume);
            }
            Step::CreateSnapshot { snapshot, volume } => {
                let handle = self.state.volume(&volume)?;
                let snap = backend
                    .create_snapshot(&snapshot, handle)
                    .map_err(StepError::Backend)?;
                self.track_snapshot(snapshot, snap);
            }
            Step::Restore {
                volume,
                snapshot,
                size,
            } => {
                let snap = self.state.snapshot(&snapshot)?;
                let handle = backend
                    .restore_from_snapshot(&volume, snap, size)
                    .map_err(StepError::Backend)?;
                self.track_volume(volume, handle);
            }
            Step::Clone {
                volume,
                source,
                size,
            } => {
                let src = self.state.volume(&source)?;
                let handle = backend
                    .clone_volume(&volume, src, size)
                    .map_err(StepError::Backend)?;
                self.track_volume(volume, handle);
            }
            // Deletes forget the handle before the backend call, so a failed
            // delete still leaves the name untracked.
            Step::DeleteVolume { volume } => {
                let handle = self
                    .state
                    .volumes
                    .remove(&volume)
                    .ok_or_else(|| StepError::stale("volume", &volume))?;
                backend.delete_volume(handle).map_err(StepError::Backend)?;
            }
            Step::DeleteSnapshot { snapshot } => {
                let snap = self
                    .state
                    .snapshots
                    .remove(&snapshot)
                    .ok_or_else(|| StepError::stale("snapshot", &snapshot))?;
                backend.delete_snapshot(snap).map_err(StepError::Backend)?;
            }
            Step::Resize { volume, size } => {
                let handle = self.state.volume(&volume)?;
                backend
                    .resize_volume(handle, size)
                    .map_err(StepError::Backend)?;
            }
        }
        Ok(())
    }

    fn track_volume(&mut self, name: String, handle: B::Volume) {
        if self.state.volumes.insert(name.clone(), handle).is_some() {
            warn!(run_id = %self.run_id, "volume '{name}' replaced an earlier handle");
        }
    }

    fn track_snapshot(&mut self, name: String, snap: B::Snapshot) {
        if self.state.snapshots.insert(name.clone(), snap).is_some() {
            warn!(run_id = %self.run_id, "snapshot '{name}' replaced an earlier handle");
        }
    }
}

/// Run `plan` once against `backend` with a throwaway runner.
pub fn run_plan<B: Backend>(plan: &Plan, backend: &B) -> Result<RunSummary, RunError> {
    PlanRunner::new(backend, "run").run(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DryRunBackend;
    use crate::operation::OpKind;

    fn op(kind: OpKind, params: &[&str]) -> Operation {
        Operation::new(kind, params.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn successful_run_tracks_handles() {
        let backend = DryRunBackend::new();
        let plan = Plan(vec![
            op(OpKind::CreateVolume, &["v"]),
            op(OpKind::CreateSnapshot, &["s", "v"]),
            op(OpKind::RestoreFromSnapshot, &["r", "s"]),
            op(OpKind::AttachConsumer, &["c", "r"]),
        ]);

        let mut runner = PlanRunner::new(&backend, "t");
        let summary = runner.run(&plan).unwrap();
        assert_eq!(summary.steps, 4);
        assert_eq!(summary.fingerprint, plan.fingerprint());

        let state = runner.state();
        assert_eq!(state.volume_names().collect::<Vec<_>>(), vec!["r", "v"]);
        assert_eq!(state.snapshot_names().collect::<Vec<_>>(), vec!["s"]);
        assert_eq!(state.consumer_volume("c"), Some("r"));
        assert_eq!(backend.calls(), plan.0);
    }

    #[test]
    fn stale_reference_is_reported_before_backend_call() {
        let backend = DryRunBackend::new();
        let plan = Plan(vec![
            op(OpKind::CreateVolume, &["v"]),
            op(OpKind::CloneVolume, &["c", "missing"]),
        ]);

        let err = run_plan(&plan, &backend).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.op, "cloneVolume");
        assert!(matches!(
            &err.source,
            StepError::StaleReference { kind: "volume", name } if name == "missing"
        ));
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn failed_delete_still_forgets_handle() {
        let backend = DryRunBackend::new().failing_at(1);
        let plan = Plan(vec![
            op(OpKind::CreateVolume, &["v"]),
            op(OpKind::DeleteVolume, &["v"]),
        ]);

        let mut runner = PlanRunner::new(&backend, "t");
        let err = runner.run(&plan).unwrap_err();
        assert!(matches!(err.source, StepError::Backend(_)));
        assert!(runner.state().is_empty());
    }

    #[test]
    fn rerun_starts_from_empty_state() {
        let backend = DryRunBackend::new();
        let plan = Plan(vec![op(OpKind::CreateVolume, &["v"])]);
        let mut runner = PlanRunner::new(&backend, "t");
        runner.run(&plan).unwrap();

        let second = Plan(vec![op(OpKind::ResizeVolume, &["v", "5Gi"])]);
        let err = runner.run(&second).unwrap_err();
        assert!(matches!(err.source, StepError::StaleReference { .. }));
        assert_eq!(runner.trace().started_steps(), vec![0]);
    }
}
