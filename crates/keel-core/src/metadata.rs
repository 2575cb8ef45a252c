//! Component metadata: configurations, declared dependencies, capabilities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dependency::DependencySpec;
use crate::module::ModuleVersionId;

/// A `(group, name, version)` co-provision declaration. Two components
/// providing the same capability are in conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub group: String,
    pub name: String,
    pub version: String,
}

impl Capability {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)
    }
}

/// A single configuration (variant) of a component.
#[derive(Debug, Clone)]
pub struct ConfigurationMetadata {
    pub name: String,
    pub dependencies: Vec<DependencySpec>,
}

impl ConfigurationMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dep: DependencySpec) -> Self {
        self.dependencies.push(dep);
        self
    }
}

/// Resolved metadata for one component.
///
/// A fresh component carries a single `default` configuration; further
/// configurations can be appended for multi-variant components.
#[derive(Debug, Clone)]
pub struct ComponentMetadata {
    pub id: ModuleVersionId,
    pub configurations: Vec<ConfigurationMetadata>,
    pub capabilities: Vec<Capability>,
}

impl ComponentMetadata {
    pub fn new(id: ModuleVersionId) -> Self {
        Self {
            id,
            configurations: vec![ConfigurationMetadata::new("default")],
            capabilities: Vec::new(),
        }
    }

    /// Append a dependency to the default (first) configuration.
    pub fn with_dependency(mut self, dep: DependencySpec) -> Self {
        self.configurations[0].dependencies.push(dep);
        self
    }

    pub fn with_configuration(mut self, configuration: ConfigurationMetadata) -> Self {
        self.configurations.push(configuration);
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Find a configuration by name.
    pub fn configuration(&self, name: &str) -> Option<(usize, &ConfigurationMetadata)> {
        self.configurations
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
    }
}
