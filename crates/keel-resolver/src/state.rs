//! Central registry for a single resolution: entity arenas, the module
//! registry, the pending-node queue, and the broadcast actions that conflict
//! handlers invoke.
//!
//! All entities live in arenas and reference each other through stable keys,
//! which keeps the intrinsically cyclic node/edge graph free of ownership
//! cycles and makes deselect-and-restart an index operation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use keel_core::metadata::ComponentMetadata;
use keel_core::module::{ComponentId, ModuleId, ModuleVersionId};

use crate::component::ComponentState;
use crate::edge::EdgeState;
use crate::module::ModuleResolveState;
use crate::node::NodeState;
use crate::queue::FetchOutcome;
use crate::resolvers::{
    ComponentResolveResult, ConfigurationMatcher, DependencySubstitution, EdgeFilter, IdResolver,
    MetadataResolver,
};
use crate::selector::SelectorState;

/// Stable handle into the component arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentKey(pub(crate) usize);

/// Stable handle into the node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub(crate) usize);

/// Stable handle into the edge arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey(pub(crate) usize);

/// Stable handle into the selector arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SelectorKey(pub(crate) usize);

/// Stable handle into the module registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey(pub(crate) usize);

/// All state for one `resolve()` call. Created fresh per resolution and
/// discarded afterwards; every mutation happens on the traversal thread.
pub struct ResolveState {
    pub(crate) components: Vec<ComponentState>,
    pub(crate) nodes: Vec<NodeState>,
    pub(crate) edges: Vec<EdgeState>,
    pub(crate) selectors: Vec<SelectorState>,
    pub(crate) modules: Vec<ModuleResolveState>,
    module_index: HashMap<ModuleId, ModuleKey>,
    selector_index: HashMap<(NodeKey, usize), SelectorKey>,
    queue: VecDeque<NodeKey>,
    root_node: NodeKey,
    root_component: ComponentKey,
    pub(crate) id_resolver: Arc<dyn IdResolver>,
    pub(crate) metadata_resolver: Arc<dyn MetadataResolver>,
    pub(crate) matcher: Arc<dyn ConfigurationMatcher>,
    pub(crate) edge_filter: Arc<dyn EdgeFilter>,
    pub(crate) substitution: Arc<dyn DependencySubstitution>,
}

impl ResolveState {
    pub(crate) fn new(
        root: ComponentResolveResult,
        id_resolver: Arc<dyn IdResolver>,
        metadata_resolver: Arc<dyn MetadataResolver>,
        matcher: Arc<dyn ConfigurationMatcher>,
        edge_filter: Arc<dyn EdgeFilter>,
        substitution: Arc<dyn DependencySubstitution>,
    ) -> Self {
        let mut state = Self {
            components: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            selectors: Vec::new(),
            modules: Vec::new(),
            module_index: HashMap::new(),
            selector_index: HashMap::new(),
            queue: VecDeque::new(),
            root_node: NodeKey(0),
            root_component: ComponentKey(0),
            id_resolver,
            metadata_resolver,
            matcher,
            edge_filter,
            substitution,
        };
        let root_component =
            state.get_revision(root.id, root.version_id, Some(root.metadata.clone()));
        state.components[root_component.0].root = true;
        let module = state.components[root_component.0].module;
        state.modules[module.0].selected = Some(root_component);
        let root_node = state.get_or_create_node(root_component, 0);
        state.nodes[root_node.0].root = true;
        state.root_component = root_component;
        state.root_node = root_node;
        state.on_more_selected(root_node);
        state
    }

    pub fn root_node(&self) -> NodeKey {
        self.root_node
    }

    pub fn root_component(&self) -> ComponentKey {
        self.root_component
    }

    // --- pending-node queue ---

    pub(crate) fn peek(&self) -> Option<NodeKey> {
        self.queue.front().copied()
    }

    pub(crate) fn pop(&mut self) -> Option<NodeKey> {
        let node = self.queue.pop_front()?;
        self.nodes[node.0].queued = false;
        Some(node)
    }

    /// Schedule a node for (re)traversal. No-op when already scheduled.
    pub(crate) fn on_more_selected(&mut self, node: NodeKey) {
        if !self.nodes[node.0].queued {
            self.nodes[node.0].queued = true;
            self.queue.push_back(node);
        }
    }

    /// Schedule a node so its now-dead outgoing edges get cleaned up.
    pub(crate) fn on_fewer_selected(&mut self, node: NodeKey) {
        self.on_more_selected(node);
    }

    // --- interning ---

    pub(crate) fn get_module(&mut self, id: &ModuleId) -> ModuleKey {
        if let Some(&key) = self.module_index.get(id) {
            return key;
        }
        let key = ModuleKey(self.modules.len());
        self.modules.push(ModuleResolveState::new(key, id.clone()));
        self.module_index.insert(id.clone(), key);
        key
    }

    /// Intern the component for a module version, creating it on first sight.
    /// Metadata handed in by the id resolver sticks to the component.
    pub(crate) fn get_revision(
        &mut self,
        id: ComponentId,
        version_id: ModuleVersionId,
        metadata: Option<Arc<ComponentMetadata>>,
    ) -> ComponentKey {
        let module = self.get_module(&version_id.module_id());
        if let Some(existing) = self.find_component(module, &version_id) {
            if self.components[existing.0].metadata.is_none() {
                self.components[existing.0].metadata = metadata;
            }
            return existing;
        }
        let key = ComponentKey(self.components.len());
        self.components
            .push(ComponentState::new(key, id, version_id, module, metadata));
        self.modules[module.0].versions.push(key);
        key
    }

    pub(crate) fn find_component(
        &self,
        module: ModuleKey,
        version_id: &ModuleVersionId,
    ) -> Option<ComponentKey> {
        self.modules[module.0]
            .versions
            .iter()
            .copied()
            .find(|&c| self.components[c.0].version_id() == version_id)
    }

    pub(crate) fn get_or_create_node(
        &mut self,
        component: ComponentKey,
        configuration: usize,
    ) -> NodeKey {
        if let Some(&existing) = self.components[component.0]
            .nodes
            .iter()
            .find(|&&n| self.nodes[n.0].configuration == configuration)
        {
            return existing;
        }
        let name = self.components[component.0]
            .metadata
            .as_ref()
            .and_then(|m| m.configurations.get(configuration))
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "default".to_string());
        let key = NodeKey(self.nodes.len());
        self.nodes
            .push(NodeState::new(key, component, configuration, name));
        self.components[component.0].nodes.push(key);
        key
    }

    pub(crate) fn selector_for(
        &mut self,
        node: NodeKey,
        index: usize,
        dep: &keel_core::dependency::DependencySpec,
    ) -> SelectorKey {
        if let Some(&existing) = self.selector_index.get(&(node, index)) {
            return existing;
        }
        let module = self.get_module(&dep.target);
        let key = SelectorKey(self.selectors.len());
        self.selectors
            .push(SelectorState::new(key, dep.clone(), module));
        self.modules[module.0].selectors.push(key);
        self.selector_index.insert((node, index), key);
        key
    }

    // --- accessors ---

    pub fn component(&self, key: ComponentKey) -> &ComponentState {
        &self.components[key.0]
    }

    pub fn node(&self, key: NodeKey) -> &NodeState {
        &self.nodes[key.0]
    }

    pub fn edge(&self, key: EdgeKey) -> &EdgeState {
        &self.edges[key.0]
    }

    pub fn selector(&self, key: SelectorKey) -> &SelectorState {
        &self.selectors[key.0]
    }

    pub fn module(&self, key: ModuleKey) -> &ModuleResolveState {
        &self.modules[key.0]
    }

    pub fn module_by_id(&self, id: &ModuleId) -> Option<&ModuleResolveState> {
        self.module_index.get(id).map(|&key| &self.modules[key.0])
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleResolveState> {
        self.modules.iter()
    }

    pub fn module_keys(&self) -> Vec<ModuleKey> {
        (0..self.modules.len()).map(ModuleKey).collect()
    }

    pub fn node_keys(&self) -> Vec<NodeKey> {
        (0..self.nodes.len()).map(NodeKey).collect()
    }

    pub fn edge_keys(&self) -> Vec<EdgeKey> {
        (0..self.edges.len()).map(EdgeKey).collect()
    }

    pub fn selector_keys(&self) -> Vec<SelectorKey> {
        (0..self.selectors.len()).map(SelectorKey).collect()
    }

    /// Whether this component is currently its module's selection.
    pub fn is_selected(&self, component: ComponentKey) -> bool {
        let module = self.components[component.0].module;
        self.modules[module.0].selected == Some(component)
    }

    pub fn node_is_selected(&self, node: NodeKey) -> bool {
        self.is_selected(self.nodes[node.0].component)
    }

    pub(crate) fn node_label(&self, node: NodeKey) -> String {
        let state = &self.nodes[node.0];
        format!(
            "{} ({})",
            self.components[state.component.0].version_id(),
            state.configuration_name()
        )
    }

    // --- metadata application ---

    pub(crate) fn apply_metadata_outcome(&mut self, outcome: FetchOutcome) {
        let component = &mut self.components[outcome.component.0];
        if component.already_resolved() {
            return;
        }
        match outcome.result {
            Ok(metadata) => component.metadata = Some(metadata),
            Err(failure) => {
                tracing::debug!(
                    "metadata for {} failed: {failure}",
                    component.version_id()
                );
                component.metadata_failure = Some(failure);
            }
        }
    }

    // --- broadcast actions ---

    /// Replace a module's selection with the conflict winner, retargeting
    /// every affected selector and edge.
    pub(crate) fn replace_selection_with_conflict_result(
        &mut self,
        module: ModuleKey,
        winner: ComponentKey,
    ) {
        self.restart_module(module, winner);
    }
}
