//! A concrete candidate version of a module and its participation in the
//! graph.

use std::sync::Arc;

use keel_core::metadata::ComponentMetadata;
use keel_core::module::{ComponentId, ModuleVersionId};

use crate::resolvers::ResolveFailure;
use crate::state::{ComponentKey, ModuleKey, NodeKey, ResolveState, SelectorKey};

/// Progress marker used during consumer-first edge emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    NotSeen,
    Visiting,
    Visited,
}

pub struct ComponentState {
    pub(crate) key: ComponentKey,
    id: ComponentId,
    version_id: ModuleVersionId,
    pub(crate) module: ModuleKey,
    pub(crate) metadata: Option<Arc<ComponentMetadata>>,
    pub(crate) metadata_failure: Option<ResolveFailure>,
    /// Nodes created for this component's configurations.
    pub(crate) nodes: Vec<NodeKey>,
    /// Selectors currently pointing at this component.
    pub(crate) selected_by: Vec<SelectorKey>,
    pub(crate) rejected: bool,
    pub(crate) root: bool,
    pub(crate) visit_state: VisitState,
}

impl ComponentState {
    pub(crate) fn new(
        key: ComponentKey,
        id: ComponentId,
        version_id: ModuleVersionId,
        module: ModuleKey,
        metadata: Option<Arc<ComponentMetadata>>,
    ) -> Self {
        Self {
            key,
            id,
            version_id,
            module,
            metadata,
            metadata_failure: None,
            nodes: Vec::new(),
            selected_by: Vec::new(),
            rejected: false,
            root: false,
            visit_state: VisitState::NotSeen,
        }
    }

    pub fn key(&self) -> ComponentKey {
        self.key
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn version_id(&self) -> &ModuleVersionId {
        &self.version_id
    }

    pub fn version(&self) -> &str {
        &self.version_id.version
    }

    pub fn module_key(&self) -> ModuleKey {
        self.module
    }

    pub fn metadata(&self) -> Option<&Arc<ComponentMetadata>> {
        self.metadata.as_ref()
    }

    pub fn metadata_failure(&self) -> Option<&ResolveFailure> {
        self.metadata_failure.as_ref()
    }

    /// Metadata already present, or already known to be unobtainable.
    pub fn already_resolved(&self) -> bool {
        self.metadata.is_some() || self.metadata_failure.is_some()
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn nodes(&self) -> &[NodeKey] {
        &self.nodes
    }

    pub fn selected_by(&self) -> &[SelectorKey] {
        &self.selected_by
    }

    pub fn visit_state(&self) -> VisitState {
        self.visit_state
    }
}

impl ResolveState {
    /// Resolve metadata for the component unless it is already known,
    /// recording a failure instead of aborting.
    pub(crate) fn ensure_component_metadata(&mut self, component: ComponentKey) {
        if self.components[component.0].already_resolved() {
            return;
        }
        let id = self.components[component.0].id.clone();
        let result = self.metadata_resolver.resolve(&id);
        match result {
            Ok(metadata) => self.components[component.0].metadata = Some(metadata),
            Err(failure) => {
                tracing::debug!("metadata for {id} failed: {failure}");
                self.components[component.0].metadata_failure = Some(failure);
            }
        }
    }

    pub(crate) fn set_visit_state(&mut self, component: ComponentKey, visit_state: VisitState) {
        self.components[component.0].visit_state = visit_state;
    }
}
