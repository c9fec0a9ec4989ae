//! Exhaustive plan generation.
//!
//! Depth-first backtracking over [`LegalityState`]: at every depth each
//! operation kind is tried, in a fixed order, against every candidate in its
//! live set. A legal candidate is applied, the search recurses, and the
//! candidate is undone before the next one is tried. Only plans of exactly
//! `max_len` steps (seed included) are reported.

use tracing::debug;

use crate::error::GenerateError;
use crate::names::{FixedNames, NameAllocator, ResourceRole};
use crate::operation::{Plan, Step, VolumeSize};
use crate::state::LegalityState;

pub const DEFAULT_RESIZE_GIB: u32 = 5;

pub struct PlanGenerator {
    names: Box<dyn NameAllocator>,
    resize_to: VolumeSize,
    seed: String,
    state: LegalityState,
    current: Vec<Step>,
    minted: [usize; ResourceRole::COUNT],
}

impl Default for PlanGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PlanGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanGenerator")
            .field("seed", &self.seed)
            .field("resize_to", &self.resize_to)
            .field("depth", &self.current.len())
            .finish()
    }
}

impl PlanGenerator {
    pub fn new() -> Self {
        Self::with_names(FixedNames::default())
    }

    pub fn with_names(names: impl NameAllocator + 'static) -> Self {
        Self::with_allocator(Box::new(names))
    }

    /// Build a generator seeded with the allocator's first volume name.
    pub fn with_allocator(names: Box<dyn NameAllocator>) -> Self {
        let seed = names.name(ResourceRole::Volume, 0);
        let mut minted = [0; ResourceRole::COUNT];
        minted[ResourceRole::Volume.index()] = 1;
        Self {
            state: LegalityState::seeded(&seed),
            current: vec![Step::CreateVolume {
                volume: seed.clone(),
            }],
            names,
            resize_to: VolumeSize(DEFAULT_RESIZE_GIB),
            seed,
            minted,
        }
    }

    /// Size used by resize and resized-create operations.
    pub fn resize_to(mut self, size: VolumeSize) -> Self {
        self.resize_to = size;
        self
    }

    pub fn seed_volume(&self) -> &str {
        &self.seed
    }

    /// Current legality state. Outside a search this is always the seed state.
    pub fn state(&self) -> &LegalityState {
        &self.state
    }

    /// Collect every legal plan of exactly `max_len` steps.
    pub fn generate(&mut self, max_len: usize) -> Result<Vec<Plan>, GenerateError> {
        let mut plans = Vec::new();
        self.for_each_plan(max_len, |steps| plans.push(Plan::from_steps(steps)))?;
        Ok(plans)
    }

    /// Count the plans [`generate`](Self::generate) would return.
    pub fn count(&mut self, max_len: usize) -> Result<u64, GenerateError> {
        let mut n = 0u64;
        self.for_each_plan(max_len, |_| n += 1)?;
        Ok(n)
    }

    /// Walk the plan space, calling `visit` once per complete plan in
    /// enumeration order.
    pub fn for_each_plan<F>(&mut self, max_len: usize, mut visit: F) -> Result<(), GenerateError>
    where
        F: FnMut(&[Step]),
    {
        if max_len == 0 {
            return Err(GenerateError::ZeroLength);
        }
        debug!(max_len, seed = %self.seed, "generating plans");
        self.backtrack(max_len, &mut visit);
        debug_assert_eq!(self.current.len(), 1);
        Ok(())
    }

    fn backtrack<F>(&mut self, max_len: usize, visit: &mut F)
    where
        F: FnMut(&[Step]),
    {
        if self.current.len() == max_len {
            visit(&self.current);
            return;
        }

        let size = self.resize_to;

        for volume in self.volumes() {
            let consumer = self.mint(ResourceRole::Consumer);
            self.try_step(
                Step::AttachConsumer { consumer, volume },
                Some(ResourceRole::Consumer),
                max_len,
                visit,
            );
        }

        for volume in self.volumes() {
            let snapshot = self.mint(ResourceRole::Snapshot);
            self.try_step(
                Step::CreateSnapshot { snapshot, volume },
                Some(ResourceRole::Snapshot),
                max_len,
                visit,
            );
        }

        for snapshot in self.snapshots() {
            let volume = self.mint(ResourceRole::Restore);
            self.try_step(
                Step::Restore {
                    volume,
                    snapshot,
                    size: None,
                },
                Some(ResourceRole::Restore),
                max_len,
                visit,
            );
        }

        for source in self.volumes() {
            let volume = self.mint(ResourceRole::Clone);
            self.try_step(
                Step::Clone {
                    volume,
                    source,
                    size: None,
                },
                Some(ResourceRole::Clone),
                max_len,
                visit,
            );
        }

        for volume in self.volumes() {
            self.try_step(Step::DeleteVolume { volume }, None, max_len, visit);
        }

        for snapshot in self.snapshots() {
            self.try_step(Step::DeleteSnapshot { snapshot }, None, max_len, visit);
        }

        for volume in self.volumes() {
            self.try_step(Step::Resize { volume, size }, None, max_len, visit);
        }

        for snapshot in self.snapshots() {
            let volume = self.mint(ResourceRole::Restore);
            self.try_step(
                Step::Restore {
                    volume,
                    snapshot,
                    size: Some(size),
                },
                Some(ResourceRole::Restore),
                max_len,
                visit,
            );
        }

        for source in self.volumes() {
            let volume = self.mint(ResourceRole::Clone);
            self.try_step(
                Step::Clone {
                    volume,
                    source,
                    size: Some(size),
                },
                Some(ResourceRole::Clone),
                max_len,
                visit,
            );
        }
    }

    fn try_step<F>(
        &mut self,
        step: Step,
        minted: Option<ResourceRole>,
        max_len: usize,
        visit: &mut F,
    ) where
        F: FnMut(&[Step]),
    {
        let Ok(undo) = self.state.apply(&step) else {
            return;
        };
        if let Some(role) = minted {
            self.minted[role.index()] += 1;
        }
        self.current.push(step);

        self.backtrack(max_len, visit);

        self.current.pop();
        if let Some(role) = minted {
            self.minted[role.index()] -= 1;
        }
        self.state.undo(undo);
    }

    fn mint(&self, role: ResourceRole) -> String {
        self.names.name(role, self.minted[role.index()])
    }

    // Candidates are copied out because the state changes while they are tried.
    fn volumes(&self) -> Vec<String> {
        self.state.live_volumes().map(str::to_string).collect()
    }

    fn snapshots(&self) -> Vec<String> {
        self.state.live_snapshots().map(str::to_string).collect()
    }
}

/// Generate the catalog for `max_len` with the default fixed names.
pub fn generate_plans(max_len: usize) -> Result<Vec<Plan>, GenerateError> {
    PlanGenerator::new().generate(max_len)
}

/// Size of the default catalog for `max_len`, without materializing it.
pub fn count_plans(max_len: usize) -> Result<u64, GenerateError> {
    PlanGenerator::new().count(max_len)
}
