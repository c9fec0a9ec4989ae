//! Operation vocabulary shared by the generator and the runner.
//!
//! An [`Operation`] is the wire form: an operation name plus positional string
//! parameters. A [`Step`] is the typed form the generator builds and the runner
//! parses back. A [`Plan`] is an ordered list of operations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    CreateVolume,
    AttachConsumer,
    CreateSnapshot,
    RestoreFromSnapshot,
    CloneVolume,
    DeleteVolume,
    DeleteSnapshot,
    ResizeVolume,
    CreateResizedRestore,
    CreateResizedClone,
}

impl OpKind {
    pub const ALL: [OpKind; 10] = [
        OpKind::CreateVolume,
        OpKind::AttachConsumer,
        OpKind::CreateSnapshot,
        OpKind::RestoreFromSnapshot,
        OpKind::CloneVolume,
        OpKind::DeleteVolume,
        OpKind::DeleteSnapshot,
        OpKind::ResizeVolume,
        OpKind::CreateResizedRestore,
        OpKind::CreateResizedClone,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::CreateVolume => "createVolume",
            OpKind::AttachConsumer => "attachConsumer",
            OpKind::CreateSnapshot => "createSnapshot",
            OpKind::RestoreFromSnapshot => "restoreFromSnapshot",
            OpKind::CloneVolume => "cloneVolume",
            OpKind::DeleteVolume => "deleteVolume",
            OpKind::DeleteSnapshot => "deleteSnapshot",
            OpKind::ResizeVolume => "resizeVolume",
            OpKind::CreateResizedRestore => "createResizedRestore",
            OpKind::CreateResizedClone => "createResizedClone",
        }
    }

    /// Number of leading parameters that are resource names.
    pub fn name_params(self) -> usize {
        match self {
            OpKind::CreateVolume
            | OpKind::DeleteVolume
            | OpKind::DeleteSnapshot
            | OpKind::ResizeVolume => 1,
            OpKind::AttachConsumer
            | OpKind::CreateSnapshot
            | OpKind::RestoreFromSnapshot
            | OpKind::CloneVolume
            | OpKind::CreateResizedRestore
            | OpKind::CreateResizedClone => 2,
        }
    }

    /// Whether the last parameter is a size literal.
    pub fn takes_size(self) -> bool {
        matches!(
            self,
            OpKind::ResizeVolume | OpKind::CreateResizedRestore | OpKind::CreateResizedClone
        )
    }

    pub fn arity(self) -> usize {
        self.name_params() + usize::from(self.takes_size())
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| StepError::UnknownOperation(s.to_string()))
    }
}

/// Volume size in GiB. Written `5Gi`; a bare integer is read as GiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeSize(pub u32);

impl VolumeSize {
    pub fn gib(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VolumeSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Gi", self.0)
    }
}

impl FromStr for VolumeSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let digits = raw.strip_suffix("Gi").unwrap_or(raw);
        match digits.parse::<u32>() {
            Ok(0) => Err(format!("size '{s}' must be greater than zero")),
            Ok(n) => Ok(VolumeSize(n)),
            Err(_) => Err(format!("size '{s}' is not a GiB quantity (expected e.g. 5Gi)")),
        }
    }
}

/// Wire form of one plan step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub op: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl Operation {
    pub fn new(kind: OpKind, params: Vec<String>) -> Self {
        Self {
            op: kind.as_str().to_string(),
            params,
        }
    }

    pub fn kind(&self) -> Result<OpKind, StepError> {
        self.op.parse()
    }

    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }

    /// Prefix every resource-name parameter with `prefix-`.
    ///
    /// Unknown operations are returned unchanged.
    pub fn namespaced(&self, prefix: &str) -> Self {
        let Ok(kind) = self.kind() else {
            return self.clone();
        };
        let names = kind.name_params();
        let params = self
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if i < names {
                    format!("{prefix}-{p}")
                } else {
                    p.clone()
                }
            })
            .collect();
        Self {
            op: self.op.clone(),
            params,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.op, self.params.join(", "))
    }
}

/// Typed plan step.
///
/// `Restore` and `Clone` carry an optional size; with a size they are the
/// resized-creation operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    CreateVolume {
        volume: String,
    },
    AttachConsumer {
        consumer: String,
        volume: String,
    },
    CreateSnapshot {
        snapshot: String,
        volume: String,
    },
    Restore {
        volume: String,
        snapshot: String,
        size: Option<VolumeSize>,
    },
    Clone {
        volume: String,
        source: String,
        size: Option<VolumeSize>,
    },
    DeleteVolume {
        volume: String,
    },
    DeleteSnapshot {
        snapshot: String,
    },
    Resize {
        volume: String,
        size: VolumeSize,
    },
}

impl Step {
    pub fn kind(&self) -> OpKind {
        match self {
            Step::CreateVolume { .. } => OpKind::CreateVolume,
            Step::AttachConsumer { .. } => OpKind::AttachConsumer,
            Step::CreateSnapshot { .. } => OpKind::CreateSnapshot,
            Step::Restore { size: None, .. } => OpKind::RestoreFromSnapshot,
            Step::Restore { size: Some(_), .. } => OpKind::CreateResizedRestore,
            Step::Clone { size: None, .. } => OpKind::CloneVolume,
            Step::Clone { size: Some(_), .. } => OpKind::CreateResizedClone,
            Step::DeleteVolume { .. } => OpKind::DeleteVolume,
            Step::DeleteSnapshot { .. } => OpKind::DeleteSnapshot,
            Step::Resize { .. } => OpKind::ResizeVolume,
        }
    }

    pub fn to_operation(&self) -> Operation {
        let params = match self {
            Step::CreateVolume { volume } | Step::DeleteVolume { volume } => vec![volume.clone()],
            Step::DeleteSnapshot { snapshot } => vec![snapshot.clone()],
            Step::AttachConsumer { consumer, volume } => vec![consumer.clone(), volume.clone()],
            Step::CreateSnapshot { snapshot, volume } => vec![snapshot.clone(), volume.clone()],
            Step::Restore {
                volume,
                snapshot,
                size,
            } => with_size(vec![volume.clone(), snapshot.clone()], *size),
            Step::Clone {
                volume,
                source,
                size,
            } => with_size(vec![volume.clone(), source.clone()], *size),
            Step::Resize { volume, size } => vec![volume.clone(), size.to_string()],
        };
        Operation::new(self.kind(), params)
    }

    /// Parse the wire form, checking the operation name and parameter layout.
    pub fn parse(op: &Operation) -> Result<Step, StepError> {
        let kind = op.kind()?;
        if op.params.len() != kind.arity() {
            return Err(StepError::invalid(
                &op.op,
                format!(
                    "expected {} parameter(s), got {}",
                    kind.arity(),
                    op.params.len()
                ),
            ));
        }
        for (i, p) in op.params.iter().take(kind.name_params()).enumerate() {
            if p.trim().is_empty() {
                return Err(StepError::invalid(
                    &op.op,
                    format!("parameter {i} is an empty name"),
                ));
            }
        }

        let name = |i: usize| op.params[i].clone();
        let size = |i: usize| -> Result<VolumeSize, StepError> {
            op.params[i]
                .parse()
                .map_err(|reason: String| StepError::invalid(&op.op, reason))
        };

        let step = match kind {
            OpKind::CreateVolume => Step::CreateVolume { volume: name(0) },
            OpKind::AttachConsumer => Step::AttachConsumer {
                consumer: name(0),
                volume: name(1),
            },
            OpKind::CreateSnapshot => Step::CreateSnapshot {
                snapshot: name(0),
                volume: name(1),
            },
            OpKind::RestoreFromSnapshot => Step::Restore {
                volume: name(0),
                snapshot: name(1),
                size: None,
            },
            OpKind::CreateResizedRestore => Step::Restore {
                volume: name(0),
                snapshot: name(1),
                size: Some(size(2)?),
            },
            OpKind::CloneVolume => Step::Clone {
                volume: name(0),
                source: name(1),
                size: None,
            },
            OpKind::CreateResizedClone => Step::Clone {
                volume: name(0),
                source: name(1),
                size: Some(size(2)?),
            },
            OpKind::DeleteVolume => Step::DeleteVolume { volume: name(0) },
            OpKind::DeleteSnapshot => Step::DeleteSnapshot { snapshot: name(0) },
            OpKind::ResizeVolume => Step::Resize {
                volume: name(0),
                size: size(1)?,
            },
        };
        Ok(step)
    }
}

fn with_size(mut params: Vec<String>, size: Option<VolumeSize>) -> Vec<String> {
    if let Some(size) = size {
        params.push(size.to_string());
    }
    params
}

/// An ordered sequence of operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan(pub Vec<Operation>);

impl Plan {
    pub fn from_steps(steps: &[Step]) -> Self {
        Plan(steps.iter().map(Step::to_operation).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.0.iter()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.0
    }

    /// Stable sha256 over the operation names and parameters.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for op in &self.0 {
            hasher.update(op.op.as_bytes());
            for p in &op.params {
                hasher.update([0x1f]);
                hasher.update(p.as_bytes());
            }
            hasher.update([0x1e]);
        }
        let digest = hasher.finalize();
        format!("{digest:x}")[..16].to_string()
    }

    /// Copy of the plan with every resource name prefixed by `prefix-`.
    pub fn namespaced(&self, prefix: &str) -> Plan {
        Plan(self.0.iter().map(|op| op.namespaced(prefix)).collect())
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, op) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{op}")?;
        }
        f.write_str("]")
    }
}
