use crate::module::ModuleId;
use crate::selector::VersionConstraint;

/// A single dependency declaration on a configuration.
#[derive(Debug, Clone)]
pub struct DependencySpec {
    pub target: ModuleId,
    pub constraint: VersionConstraint,
    /// Optional declarations do not pull the target module into the graph on
    /// their own; they only take effect once a hard edge references it.
    pub optional: bool,
    /// Configuration requested on the target component. `None` asks the
    /// matcher for the default.
    pub configuration: Option<String>,
}

impl DependencySpec {
    pub fn new(target: ModuleId, constraint: VersionConstraint) -> Self {
        Self {
            target,
            constraint,
            optional: false,
            configuration: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_configuration(mut self, name: impl Into<String>) -> Self {
        self.configuration = Some(name.into());
        self
    }
}
