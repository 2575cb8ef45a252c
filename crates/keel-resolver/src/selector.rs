//! Selector state and the per-module selector resolution cache.

use keel_core::dependency::DependencySpec;
use keel_core::selector::VersionConstraint;
use keel_core::version::ModuleVersion;

use crate::resolvers::{IdResolveResult, ResolveFailure};
use crate::state::{ComponentKey, ModuleKey, ResolveState, SelectorKey};

/// One declared selector: a dependency declaration pointing at a target
/// module. Its resolution result is cached in the target module's
/// [`SelectorResults`]; the component it currently selects is cached here.
pub struct SelectorState {
    pub(crate) key: SelectorKey,
    pub(crate) dep: DependencySpec,
    pub(crate) target_module: ModuleKey,
    pub(crate) selected: Option<ComponentKey>,
}

impl SelectorState {
    pub(crate) fn new(key: SelectorKey, dep: DependencySpec, target_module: ModuleKey) -> Self {
        Self {
            key,
            dep,
            target_module,
            selected: None,
        }
    }

    pub fn key(&self) -> SelectorKey {
        self.key
    }

    pub fn requested(&self) -> &DependencySpec {
        &self.dep
    }

    pub fn constraint(&self) -> &VersionConstraint {
        &self.dep.constraint
    }

    pub fn target_module_key(&self) -> ModuleKey {
        self.target_module
    }

    pub fn selected_component(&self) -> Option<ComponentKey> {
        self.selected
    }

    pub fn is_force(&self) -> bool {
        self.dep.constraint.force
    }
}

/// Insertion-ordered map from selector to its id-resolve result, scoped to
/// one module. Order only matters for deterministic iteration.
#[derive(Default)]
pub struct SelectorResults {
    results: Vec<(SelectorKey, IdResolveResult)>,
}

impl SelectorResults {
    pub(crate) fn get(&self, selector: SelectorKey) -> Option<&IdResolveResult> {
        self.results
            .iter()
            .find(|(key, _)| *key == selector)
            .map(|(_, result)| result)
    }

    pub(crate) fn put(&mut self, selector: SelectorKey, result: IdResolveResult) {
        if let Some(entry) = self.results.iter_mut().find(|(key, _)| *key == selector) {
            entry.1 = result;
        } else {
            self.results.push((selector, result));
        }
    }

    /// Scan existing results for one this constraint would accept as-is.
    pub(crate) fn find_compatible(&self, constraint: &VersionConstraint) -> Option<&IdResolveResult> {
        self.results
            .iter()
            .map(|(_, result)| result)
            .find(|result| included(constraint, result))
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = SelectorKey> + '_ {
        self.results.iter().map(|(key, _)| *key)
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (SelectorKey, &IdResolveResult)> {
        self.results.iter().map(|(key, result)| (*key, result))
    }
}

/// Whether the constraint would re-select this already-resolved result
/// without consulting the id resolver again.
fn included(constraint: &VersionConstraint, result: &IdResolveResult) -> bool {
    if result.failure.is_some() {
        return false;
    }
    let Some(preferred) = &constraint.preferred else {
        return false;
    };
    if !preferred.can_short_circuit() {
        return false;
    }
    let Some(version_id) = &result.version_id else {
        return false;
    };
    preferred.accepts(&ModuleVersion::parse(&version_id.version))
}

impl ResolveState {
    /// Resolve the selector's target id. Consults the module's results cache
    /// first, and back-propagates a fresh compatible result onto selectors
    /// resolved earlier.
    pub(crate) fn resolve_selector(&mut self, selector: SelectorKey) -> IdResolveResult {
        let module = self.selectors[selector.0].target_module;
        if let Some(result) = self.modules[module.0].results.get(selector) {
            return result.clone();
        }

        let constraint = self.selectors[selector.0].dep.constraint.clone();
        if let Some(result) = self.modules[module.0].results.find_compatible(&constraint) {
            let result = result.clone();
            tracing::debug!(
                "reusing {} for selector on {}",
                result
                    .version_id
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                self.modules[module.0].id()
            );
            self.modules[module.0].results.put(selector, result.clone());
            return result;
        }

        let target = self.selectors[selector.0].dep.target.clone();
        let result = self.id_resolver.resolve(&target, &constraint);

        if result.failure.is_none() {
            let compatible: Vec<SelectorKey> = self.modules[module.0]
                .results
                .keys()
                .filter(|&other| other != selector)
                .filter(|&other| included(&self.selectors[other.0].dep.constraint, &result))
                .collect();
            for other in compatible {
                self.modules[module.0].results.put(other, result.clone());
            }
        }
        self.modules[module.0].results.put(selector, result.clone());
        result
    }

    /// The id-resolve failure recorded for this selector, if any.
    pub fn selector_failure(&self, selector: SelectorKey) -> Option<&ResolveFailure> {
        let module = self.selectors[selector.0].target_module;
        self.modules[module.0]
            .results
            .get(selector)
            .and_then(|result| result.failure.as_ref())
    }

    /// Record that a selector now points at this component. Keeps the
    /// component's `selected_by` set exactly in sync with the selectors.
    pub(crate) fn select_by(&mut self, selector: SelectorKey, component: ComponentKey) {
        if let Some(previous) = self.selectors[selector.0].selected {
            if previous == component {
                return;
            }
            self.components[previous.0]
                .selected_by
                .retain(|&s| s != selector);
        }
        self.selectors[selector.0].selected = Some(component);
        if !self.components[component.0].selected_by.contains(&selector) {
            self.components[component.0].selected_by.push(selector);
        }
    }

    /// Fold the module's per-selector results into the distinct components
    /// they name. A force selector collapses the set to its component; a
    /// recorded failure propagates verbatim.
    pub fn resolved_components(
        &self,
        module: ModuleKey,
    ) -> Result<Vec<ComponentKey>, ResolveFailure> {
        let mut components = Vec::new();
        for (selector, result) in self.modules[module.0].results.entries() {
            if let Some(failure) = &result.failure {
                return Err(failure.clone());
            }
            let Some(version_id) = &result.version_id else {
                continue;
            };
            let Some(component) = self.find_component(module, version_id) else {
                continue;
            };
            if !components.contains(&component) {
                components.push(component);
            }
            if self.selectors[selector.0].dep.constraint.force {
                return Ok(vec![component]);
            }
        }
        Ok(components)
    }
}
