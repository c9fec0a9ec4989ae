//! Planning-time legality state.
//!
//! Tracks which logical resources exist and how they relate, without any
//! backend objects. Every operation has a pure check, an apply that performs
//! check and mutation, and an undo that restores the exact prior state.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Illegal;
use crate::operation::{Plan, Step};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegalityState {
    live_volumes: BTreeSet<String>,
    live_consumers: BTreeSet<String>,
    live_snapshots: BTreeSet<String>,
    volume_to_consumer: BTreeMap<String, String>,
    volume_to_snapshot: BTreeMap<String, String>,
    snapshot_to_restore: BTreeMap<String, String>,
    volume_to_clone: BTreeMap<String, String>,
    restore_results: BTreeSet<String>,
    clone_results: BTreeSet<String>,
    resized: BTreeSet<String>,
}

/// Record of one applied step; hand it back to [`LegalityState::undo`].
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Undo {
    step: Step,
    // Fixed names can target a name that is already live or already tagged;
    // only entries this step actually inserted are removed again.
    fresh: bool,
    tagged: bool,
}

impl Undo {
    pub fn step(&self) -> &Step {
        &self.step
    }
}

impl LegalityState {
    /// Initial state of every plan: one live volume and nothing else.
    pub fn seeded(volume: &str) -> Self {
        let mut state = Self::default();
        state.live_volumes.insert(volume.to_string());
        state
    }

    pub fn live_volumes(&self) -> impl Iterator<Item = &str> {
        self.live_volumes.iter().map(String::as_str)
    }

    pub fn live_snapshots(&self) -> impl Iterator<Item = &str> {
        self.live_snapshots.iter().map(String::as_str)
    }

    pub fn live_consumers(&self) -> impl Iterator<Item = &str> {
        self.live_consumers.iter().map(String::as_str)
    }

    pub fn is_volume_live(&self, volume: &str) -> bool {
        self.live_volumes.contains(volume)
    }

    pub fn is_snapshot_live(&self, snapshot: &str) -> bool {
        self.live_snapshots.contains(snapshot)
    }

    pub fn consumer_of(&self, volume: &str) -> Option<&str> {
        self.volume_to_consumer.get(volume).map(String::as_str)
    }

    pub fn snapshot_of(&self, volume: &str) -> Option<&str> {
        self.volume_to_snapshot.get(volume).map(String::as_str)
    }

    pub fn restore_of(&self, snapshot: &str) -> Option<&str> {
        self.snapshot_to_restore.get(snapshot).map(String::as_str)
    }

    pub fn clone_of(&self, volume: &str) -> Option<&str> {
        self.volume_to_clone.get(volume).map(String::as_str)
    }

    pub fn is_restore_result(&self, volume: &str) -> bool {
        self.restore_results.contains(volume)
    }

    pub fn is_clone_result(&self, volume: &str) -> bool {
        self.clone_results.contains(volume)
    }

    pub fn is_resized(&self, volume: &str) -> bool {
        self.resized.contains(volume)
    }

    /// Decide whether `step` may be appended in the current state.
    pub fn check(&self, step: &Step) -> Result<(), Illegal> {
        match step {
            Step::CreateVolume { volume } => self.require_free_volume(volume),
            Step::AttachConsumer { consumer, volume } => {
                self.require_volume(volume)?;
                if self.volume_to_consumer.contains_key(volume) {
                    return Err(already_mapped("consumer", volume));
                }
                Ok(())
            }
            Step::CreateSnapshot { volume, .. } => {
                self.require_volume(volume)?;
                if self.volume_to_snapshot.contains_key(volume) {
                    return Err(already_mapped("snapshot", volume));
                }
                if self.restore_results.contains(volume) {
                    return Err(Illegal::RestoreNotSnapshottable(volume.clone()));
                }
                Ok(())
            }
            Step::Restore { snapshot, .. } => {
                self.require_snapshot(snapshot)?;
                if self.snapshot_to_restore.contains_key(snapshot) {
                    return Err(already_mapped("restore", snapshot));
                }
                Ok(())
            }
            Step::Clone { source, .. } => {
                self.require_volume(source)?;
                if self.volume_to_clone.contains_key(source) {
                    return Err(already_mapped("clone", source));
                }
                if self.clone_results.contains(source) {
                    return Err(Illegal::CloneNotClonable(source.clone()));
                }
                Ok(())
            }
            Step::DeleteVolume { volume } => self.require_volume(volume),
            Step::DeleteSnapshot { snapshot } => self.require_snapshot(snapshot),
            Step::Resize { volume, .. } => {
                self.require_volume(volume)?;
                if self.clone_results.contains(volume)
                    || self.restore_results.contains(volume)
                    || self.resized.contains(volume)
                {
                    return Err(Illegal::ResizeForbidden(volume.clone()));
                }
                Ok(())
            }
        }
    }

    /// Check `step` and, if legal, mutate the state.
    pub fn apply(&mut self, step: &Step) -> Result<Undo, Illegal> {
        self.check(step)?;
        let mut fresh = false;
        let mut tagged = false;
        match step {
            Step::CreateVolume { volume } => {
                fresh = self.live_volumes.insert(volume.clone());
            }
            Step::AttachConsumer { consumer, volume } => {
                self.volume_to_consumer
                    .insert(volume.clone(), consumer.clone());
                fresh = self.live_consumers.insert(consumer.clone());
            }
            Step::CreateSnapshot { snapshot, volume } => {
                self.volume_to_snapshot
                    .insert(volume.clone(), snapshot.clone());
                fresh = self.live_snapshots.insert(snapshot.clone());
            }
            Step::Restore {
                volume, snapshot, ..
            } => {
                self.snapshot_to_restore
                    .insert(snapshot.clone(), volume.clone());
                fresh = self.live_volumes.insert(volume.clone());
                tagged = self.restore_results.insert(volume.clone());
            }
            Step::Clone { volume, source, .. } => {
                self.volume_to_clone.insert(source.clone(), volume.clone());
                fresh = self.live_volumes.insert(volume.clone());
                tagged = self.clone_results.insert(volume.clone());
            }
            Step::DeleteVolume { volume } => {
                self.live_volumes.remove(volume);
            }
            Step::DeleteSnapshot { snapshot } => {
                self.live_snapshots.remove(snapshot);
            }
            Step::Resize { volume, .. } => {
                self.resized.insert(volume.clone());
            }
        }
        Ok(Undo {
            step: step.clone(),
            fresh,
            tagged,
        })
    }

    /// Reverse a previous [`apply`](Self::apply). Undos must be replayed in
    /// reverse order of application.
    pub fn undo(&mut self, undo: Undo) {
        let Undo {
            step,
            fresh,
            tagged,
        } = undo;
        match step {
            Step::CreateVolume { volume } => {
                if fresh {
                    self.live_volumes.remove(&volume);
                }
            }
            Step::AttachConsumer { consumer, volume } => {
                self.volume_to_consumer.remove(&volume);
                if fresh {
                    self.live_consumers.remove(&consumer);
                }
            }
            Step::CreateSnapshot { snapshot, volume } => {
                self.volume_to_snapshot.remove(&volume);
                if fresh {
                    self.live_snapshots.remove(&snapshot);
                }
            }
            Step::Restore {
                volume, snapshot, ..
            } => {
                self.snapshot_to_restore.remove(&snapshot);
                if fresh {
                    self.live_volumes.remove(&volume);
                }
                if tagged {
                    self.restore_results.remove(&volume);
                }
            }
            Step::Clone { volume, source, .. } => {
                self.volume_to_clone.remove(&source);
                if fresh {
                    self.live_volumes.remove(&volume);
                }
                if tagged {
                    self.clone_results.remove(&volume);
                }
            }
            Step::DeleteVolume { volume } => {
                self.live_volumes.insert(volume);
            }
            Step::DeleteSnapshot { snapshot } => {
                self.live_snapshots.insert(snapshot);
            }
            Step::Resize { volume, .. } => {
                self.resized.remove(&volume);
            }
        }
    }

    /// Apply every step of `plan` in order to a fresh copy of `self`.
    ///
    /// Returns the index and reason of the first step that fails to parse or
    /// is illegal.
    pub fn replay(&self, plan: &Plan) -> Result<LegalityState, (usize, String)> {
        let mut state = self.clone();
        for (idx, op) in plan.iter().enumerate() {
            let step = Step::parse(op).map_err(|e| (idx, e.to_string()))?;
            let _ = state.apply(&step).map_err(|e| (idx, e.to_string()))?;
        }
        Ok(state)
    }

    /// Structural invariants that must hold after every applied step.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        for volume in self.volume_to_snapshot.keys() {
            if self.restore_results.contains(volume) {
                out.push(format!("restore '{volume}' has a snapshot"));
            }
        }
        for volume in self.volume_to_clone.keys() {
            if self.clone_results.contains(volume) {
                out.push(format!("clone '{volume}' has a clone"));
            }
        }
        for volume in &self.resized {
            if self.clone_results.contains(volume) || self.restore_results.contains(volume) {
                out.push(format!("derived volume '{volume}' was resized"));
            }
        }
        out
    }

    fn require_volume(&self, volume: &str) -> Result<(), Illegal> {
        if self.live_volumes.contains(volume) {
            Ok(())
        } else {
            Err(Illegal::NotLive {
                kind: "volume",
                name: volume.to_string(),
            })
        }
    }

    fn require_snapshot(&self, snapshot: &str) -> Result<(), Illegal> {
        if self.live_snapshots.contains(snapshot) {
            Ok(())
        } else {
            Err(Illegal::NotLive {
                kind: "snapshot",
                name: snapshot.to_string(),
            })
        }
    }

    fn require_free_volume(&self, volume: &str) -> Result<(), Illegal> {
        if self.live_volumes.contains(volume) {
            Err(Illegal::NameInUse {
                kind: "volume",
                name: volume.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn already_mapped(relation: &'static str, key: &str) -> Illegal {
    Illegal::AlreadyMapped {
        relation,
        key: key.to_string(),
    }
}
