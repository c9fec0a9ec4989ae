//! Naming of resources created by the generator.

use serde::{Deserialize, Serialize};

/// The role a freshly created resource plays in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceRole {
    Volume,
    Consumer,
    Snapshot,
    Restore,
    Clone,
}

impl ResourceRole {
    pub const COUNT: usize = 5;

    pub fn index(self) -> usize {
        match self {
            ResourceRole::Volume => 0,
            ResourceRole::Consumer => 1,
            ResourceRole::Snapshot => 2,
            ResourceRole::Restore => 3,
            ResourceRole::Clone => 4,
        }
    }
}

/// Names a resource the generator is about to create.
///
/// `ordinal` counts resources of the same role already created earlier in the
/// current branch (the seed volume has ordinal 0).
pub trait NameAllocator {
    fn name(&self, role: ResourceRole, ordinal: usize) -> String;
}

/// One constant name per role; the ordinal is ignored.
///
/// At most one resource of each role can be live at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedNames {
    pub volume: String,
    pub consumer: String,
    pub snapshot: String,
    pub restore: String,
    pub clone: String,
}

impl Default for FixedNames {
    fn default() -> Self {
        Self {
            volume: "vol".to_string(),
            consumer: "consumer".to_string(),
            snapshot: "vol-snapshot".to_string(),
            restore: "vol-restore".to_string(),
            clone: "vol-clone".to_string(),
        }
    }
}

impl FixedNames {
    pub fn for_role(&self, role: ResourceRole) -> &str {
        match role {
            ResourceRole::Volume => &self.volume,
            ResourceRole::Consumer => &self.consumer,
            ResourceRole::Snapshot => &self.snapshot,
            ResourceRole::Restore => &self.restore,
            ResourceRole::Clone => &self.clone,
        }
    }

    /// Volume-like roles share one namespace, so their names must differ.
    pub fn validate(&self) -> Result<(), String> {
        let all = [
            ("volume", &self.volume),
            ("consumer", &self.consumer),
            ("snapshot", &self.snapshot),
            ("restore", &self.restore),
            ("clone", &self.clone),
        ];
        for (label, name) in all.iter() {
            if name.trim().is_empty() {
                return Err(format!("{label} name must not be empty"));
            }
        }
        let volumes = [&self.volume, &self.restore, &self.clone];
        for (i, a) in volumes.iter().enumerate() {
            if volumes[i + 1..].contains(a) {
                return Err(format!(
                    "volume, restore and clone names must be distinct ('{a}' repeats)"
                ));
            }
        }
        Ok(())
    }
}

impl NameAllocator for FixedNames {
    fn name(&self, role: ResourceRole, _ordinal: usize) -> String {
        self.for_role(role).to_string()
    }
}

/// A unique name per creation: `<base>-<ordinal>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequentialNames {
    pub base: FixedNames,
}

impl NameAllocator for SequentialNames {
    fn name(&self, role: ResourceRole, ordinal: usize) -> String {
        format!("{}-{ordinal}", self.base.for_role(role))
    }
}

/// Which allocator a configuration selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamePolicy {
    #[default]
    Fixed,
    Sequential,
}

impl NamePolicy {
    pub fn allocator(self, base: FixedNames) -> Box<dyn NameAllocator> {
        match self {
            NamePolicy::Fixed => Box::new(base),
            NamePolicy::Sequential => Box::new(SequentialNames { base }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_names_ignore_ordinal() {
        let names = FixedNames::default();
        assert_eq!(names.name(ResourceRole::Consumer, 0), "consumer");
        assert_eq!(names.name(ResourceRole::Consumer, 4), "consumer");
    }

    #[test]
    fn sequential_names_append_ordinal() {
        let names = SequentialNames::default();
        assert_eq!(names.name(ResourceRole::Volume, 0), "vol-0");
        assert_eq!(names.name(ResourceRole::Clone, 2), "vol-clone-2");
    }

    #[test]
    fn validate_rejects_colliding_volume_names() {
        let names = FixedNames {
            restore: "vol".to_string(),
            ..FixedNames::default()
        };
        let err = names.validate().unwrap_err();
        assert!(err.contains("'vol' repeats"), "{err}");

        let names = FixedNames {
            consumer: "".to_string(),
            ..FixedNames::default()
        };
        assert!(names.validate().is_err());
        assert!(FixedNames::default().validate().is_ok());
    }
}
