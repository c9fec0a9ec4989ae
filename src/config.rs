//! YAML configuration for the `volplan` front end.
//!
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration. Command-line flags override file values.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::backend::{CommandBackend, DEFAULT_TIMEOUT_SECS};
use crate::bounded_executor::BatchOptions;
use crate::generator::{PlanGenerator, DEFAULT_RESIZE_GIB};
use crate::names::{FixedNames, NamePolicy};
use crate::operation::VolumeSize;

pub const DEFAULT_MAX_LEN: usize = 3;
pub const DEFAULT_PRINT_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanConfig {
    /// Plan length, seed included.
    pub max_len: usize,
    /// How many plans `generate` prints before the catalog size.
    pub limit: usize,
    pub names: FixedNames,
    pub name_policy: NamePolicy,
    /// Target size, in GiB, of resize and resized-create operations.
    pub resize_gib: u32,
    pub max_parallel: usize,
    pub command: Option<CommandConfig>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_LEN,
            limit: DEFAULT_PRINT_LIMIT,
            names: FixedNames::default(),
            name_policy: NamePolicy::default(),
            resize_gib: DEFAULT_RESIZE_GIB,
            max_parallel: 1,
            command: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl PlanConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let cfg = Self::from_yaml_str(&text)
            .with_context(|| format!("invalid config: {}", path.display()))?;
        debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        // An empty document deserializes as null; treat it as all defaults.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: PlanConfig = serde_yaml::from_str(text).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_len == 0 {
            return Err(anyhow!("max_len must be >= 1"));
        }
        if self.resize_gib == 0 {
            return Err(anyhow!("resize_gib must be >= 1"));
        }
        if self.max_parallel == 0 {
            return Err(anyhow!("max_parallel must be >= 1"));
        }
        self.names
            .validate()
            .map_err(|e| anyhow!("names: {e}"))?;
        if let Some(cmd) = &self.command {
            if cmd.program.as_os_str().is_empty() {
                return Err(anyhow!("command.program must not be empty"));
            }
            if cmd.timeout_secs == 0 {
                return Err(anyhow!("command.timeout_secs must be >= 1"));
            }
        }
        Ok(())
    }

    pub fn generator(&self) -> PlanGenerator {
        PlanGenerator::with_allocator(self.name_policy.allocator(self.names.clone()))
            .resize_to(VolumeSize(self.resize_gib))
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            max_parallel: self.max_parallel,
        }
    }

    pub fn command_backend(&self) -> Result<CommandBackend> {
        let cmd = self
            .command
            .as_ref()
            .ok_or_else(|| anyhow!("the command backend needs a `command:` section in the config"))?;
        Ok(CommandBackend::new(cmd.program.clone())
            .with_args(cmd.args.clone())
            .with_timeout_secs(cmd.timeout_secs))
    }
}
