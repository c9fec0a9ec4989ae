//! Error types shared by the generator, the runner and the batch executor.

use thiserror::Error;

/// Why a candidate operation may not be appended to a plan.
///
/// Only the generator sees these; they prune a branch and never reach a caller
/// of [`crate::generator::generate_plans`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Illegal {
    #[error("{kind} '{name}' does not exist")]
    NotLive { kind: &'static str, name: String },

    #[error("{kind} '{name}' already exists")]
    NameInUse { kind: &'static str, name: String },

    #[error("{relation} already recorded for '{key}'")]
    AlreadyMapped { relation: &'static str, key: String },

    #[error("volume '{0}' was restored from a snapshot and cannot be snapshotted")]
    RestoreNotSnapshottable(String),

    #[error("volume '{0}' is a clone and cannot be cloned")]
    CloneNotClonable(String),

    #[error("volume '{0}' cannot be resized")]
    ResizeForbidden(String),
}

/// Failure of a single plan step inside the runner.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("invalid parameters for '{op}': {reason}")]
    InvalidParams { op: String, reason: String },

    #[error("{kind} '{name}' is not tracked by this run")]
    StaleReference { kind: &'static str, name: String },

    #[error("backend call failed")]
    Backend(#[source] anyhow::Error),
}

impl StepError {
    pub fn invalid(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            op: op.into(),
            reason: reason.into(),
        }
    }

    pub fn stale(kind: &'static str, name: impl Into<String>) -> Self {
        Self::StaleReference {
            kind,
            name: name.into(),
        }
    }
}

/// A plan run aborted at `index` (0-based) while executing `op`.
#[derive(Debug, Error)]
#[error("step {index} ({op}) failed")]
pub struct RunError {
    pub index: usize,
    pub op: String,
    #[source]
    pub source: StepError,
}

impl RunError {
    /// Render the error together with its cause chain on one line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut cur: Option<&(dyn std::error::Error + 'static)> = Some(&self.source);
        while let Some(cause) = cur {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            cur = cause.source();
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error("max_len must be >= 1 (every plan starts with the seed volume)")]
    ZeroLength,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("max_parallel must be >= 1")]
    ZeroParallelism,

    #[error("{0} batch worker(s) panicked")]
    WorkerPanicked(usize),

    #[error("batch outcome count mismatch (expected {expected}, got {got})")]
    OutcomeMismatch { expected: usize, got: usize },
}
