//! `volplan`: exhaustive storage-lifecycle plan generation and replay.
//!
//! The generator (`generator`) enumerates every legal sequence of volume,
//! consumer, snapshot, restore, clone and resize operations up to a fixed
//! length, using a backtracking search over `state::LegalityState`. The runner
//! (`runner`) replays one plan against a `runner::Backend` and stops at the
//! first failure; `bounded_executor` runs a whole catalog on a bounded worker
//! pool.
//!
//! Invariants:
//! - enumeration order is deterministic (fixed operation order, ordered sets)
//! - every prefix of a generated plan is legal
//! - generation leaves the legality state exactly as seeded

pub mod backend;
pub mod bounded_executor;
pub mod config;
pub mod error;
pub mod generator;
pub mod names;
pub mod operation;
pub mod plan;
pub mod runner;
pub mod state;
pub mod trace;
