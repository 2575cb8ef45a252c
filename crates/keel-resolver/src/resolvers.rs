//! Contracts between the graph engine and the surrounding build tool:
//! id and metadata resolution, root lookup, configuration matching, edge
//! filtering, dependency substitution, and module replacements.

use std::fmt;
use std::sync::Arc;

use keel_core::dependency::DependencySpec;
use keel_core::metadata::ComponentMetadata;
use keel_core::module::{ComponentId, ModuleId, ModuleVersionId};
use keel_core::selector::VersionConstraint;

/// What went wrong, for reporting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    IdResolve,
    MetadataResolve,
    RejectedSelection,
    ConflictResolver,
}

/// A local failure recorded during resolution.
///
/// Recorded failures do not stop the traversal; they surface on the affected
/// selector or edge so the caller sees every problem at once.
#[derive(Debug, Clone)]
pub struct ResolveFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ResolveFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of resolving a selector to a concrete component id.
#[derive(Debug, Clone)]
pub struct IdResolveResult {
    pub id: Option<ComponentId>,
    pub version_id: Option<ModuleVersionId>,
    /// Metadata the id resolver happened to have on hand. `None` defers to
    /// the metadata resolver.
    pub metadata: Option<Arc<ComponentMetadata>>,
    pub failure: Option<ResolveFailure>,
}

impl IdResolveResult {
    pub fn resolved(
        id: ComponentId,
        version_id: ModuleVersionId,
        metadata: Option<Arc<ComponentMetadata>>,
    ) -> Self {
        Self {
            id: Some(id),
            version_id: Some(version_id),
            metadata,
            failure: None,
        }
    }

    pub fn failed(failure: ResolveFailure) -> Self {
        Self {
            id: None,
            version_id: None,
            metadata: None,
            failure: Some(failure),
        }
    }
}

/// Resolves a declared selector to a component id, without necessarily
/// fetching full metadata.
pub trait IdResolver {
    fn resolve(&self, target: &ModuleId, constraint: &VersionConstraint) -> IdResolveResult;
}

/// Resolves full component metadata.
///
/// Implementations may be called from worker threads during parallel
/// prefetch and must be thread-safe.
pub trait MetadataResolver: Send + Sync {
    /// Cheap metadata (already cached, a local project) skips the parallel
    /// prefetch entirely.
    fn is_fetching_cheap(&self, id: &ComponentId) -> bool;

    fn resolve(&self, id: &ComponentId) -> Result<Arc<ComponentMetadata>, ResolveFailure>;
}

/// Names the resolution being performed.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub name: String,
}

impl ResolveContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// The fully resolved root of a resolution.
#[derive(Debug, Clone)]
pub struct ComponentResolveResult {
    pub id: ComponentId,
    pub version_id: ModuleVersionId,
    pub metadata: Arc<ComponentMetadata>,
}

/// Produces the root component for a resolve context.
pub trait ContextResolver {
    fn resolve(&self, context: &ResolveContext) -> Result<ComponentResolveResult, ResolveFailure>;
}

/// Picks the configurations of a target component an edge attaches to.
/// Stands in for full attribute matching.
pub trait ConfigurationMatcher {
    fn select_configurations(&self, dep: &DependencySpec, target: &ComponentMetadata)
        -> Vec<usize>;
}

/// Matches the requested configuration by name. A dependency with no
/// requested configuration falls back to `default`, then to the first
/// configuration the component declares.
pub struct DefaultConfigurationMatcher;

impl ConfigurationMatcher for DefaultConfigurationMatcher {
    fn select_configurations(
        &self,
        dep: &DependencySpec,
        target: &ComponentMetadata,
    ) -> Vec<usize> {
        let wanted = dep.configuration.as_deref().unwrap_or("default");
        if let Some((index, _)) = target.configuration(wanted) {
            return vec![index];
        }
        if dep.configuration.is_none() && !target.configurations.is_empty() {
            return vec![0];
        }
        Vec::new()
    }
}

/// Drops dependency declarations before they become edges.
pub trait EdgeFilter {
    fn accept(&self, dep: &DependencySpec) -> bool;
}

pub struct AcceptAllEdges;

impl EdgeFilter for AcceptAllEdges {
    fn accept(&self, _dep: &DependencySpec) -> bool {
        true
    }
}

/// Rewrites a dependency before resolution. Returns `None` to keep the
/// declaration as-is.
pub trait DependencySubstitution {
    fn substitute(&self, dep: &DependencySpec) -> Option<DependencySpec>;
}

pub struct NoSubstitution;

impl DependencySubstitution for NoSubstitution {
    fn substitute(&self, _dep: &DependencySpec) -> Option<DependencySpec> {
        None
    }
}

/// External data mapping a module id onto the module that replaces it.
#[derive(Debug, Clone, Default)]
pub struct ModuleReplacements {
    replacements: Vec<(ModuleId, ModuleId)>,
}

impl ModuleReplacements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: ModuleId, target: ModuleId) {
        self.replacements.push((source, target));
    }

    pub fn replacement_for(&self, id: &ModuleId) -> Option<&ModuleId> {
        self.replacements
            .iter()
            .find(|(source, _)| source == id)
            .map(|(_, target)| target)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModuleId, &ModuleId)> {
        self.replacements.iter().map(|(s, t)| (s, t))
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }
}
