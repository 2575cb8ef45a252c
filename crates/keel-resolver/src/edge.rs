//! A dependency arrow from a node onto a target module and, once selection
//! settles, onto a target component's configurations.

use keel_core::dependency::DependencySpec;

use crate::resolvers::{FailureKind, ResolveFailure};
use crate::state::{ComponentKey, EdgeKey, NodeKey, ResolveState, SelectorKey};

pub struct EdgeState {
    pub(crate) key: EdgeKey,
    pub(crate) from: NodeKey,
    pub(crate) dep: DependencySpec,
    pub(crate) selector: SelectorKey,
    pub(crate) target: Option<ComponentKey>,
    /// Nodes of the target component this edge is attached to.
    pub(crate) target_nodes: Vec<NodeKey>,
    /// Attach-time failure recorded on the edge itself.
    pub(crate) failure: Option<ResolveFailure>,
}

impl EdgeState {
    pub(crate) fn new(key: EdgeKey, from: NodeKey, dep: DependencySpec, selector: SelectorKey) -> Self {
        Self {
            key,
            from,
            dep,
            selector,
            target: None,
            target_nodes: Vec::new(),
            failure: None,
        }
    }

    pub fn key(&self) -> EdgeKey {
        self.key
    }

    pub fn from_node(&self) -> NodeKey {
        self.from
    }

    pub fn requested(&self) -> &DependencySpec {
        &self.dep
    }

    pub fn selector_key(&self) -> SelectorKey {
        self.selector
    }

    pub fn target_component(&self) -> Option<ComponentKey> {
        self.target
    }
}

impl ResolveState {
    pub(crate) fn new_edge(
        &mut self,
        from: NodeKey,
        dep: DependencySpec,
        selector: SelectorKey,
    ) -> EdgeKey {
        let key = EdgeKey(self.edges.len());
        self.edges.push(EdgeState::new(key, from, dep, selector));
        key
    }

    /// Point the edge at a target component. Idempotent; attachment to the
    /// target's configurations happens in the serial attachment phase.
    pub(crate) fn start_edge(&mut self, edge: EdgeKey, component: ComponentKey) {
        self.edges[edge.0].target = Some(component);
    }

    /// The failure recorded for this edge, if any: an attach-time failure on
    /// the edge itself, or the id-resolve failure of its selector.
    pub fn edge_failure(&self, edge: EdgeKey) -> Option<&ResolveFailure> {
        let state = &self.edges[edge.0];
        state
            .failure
            .as_ref()
            .or_else(|| self.selector_failure(state.selector))
    }

    /// Detach the edge from every target node it reached.
    pub(crate) fn detach_edge(&mut self, edge: EdgeKey) {
        let targets = std::mem::take(&mut self.edges[edge.0].target_nodes);
        for node in targets {
            self.remove_incoming_edge(node, edge);
        }
        let selector = self.edges[edge.0].selector;
        let module = self.selectors[selector.0].target_module;
        self.modules[module.0].unattached.retain(|&e| e != edge);
    }

    pub(crate) fn add_unattached(&mut self, edge: EdgeKey) {
        let selector = self.edges[edge.0].selector;
        let module = self.selectors[selector.0].target_module;
        if !self.modules[module.0].unattached.contains(&edge) {
            self.modules[module.0].unattached.push(edge);
        }
    }

    fn remove_unattached(&mut self, edge: EdgeKey) {
        let selector = self.edges[edge.0].selector;
        let module = self.selectors[selector.0].target_module;
        self.modules[module.0].unattached.retain(|&e| e != edge);
    }

    /// Attach to the target component's matching configurations, creating
    /// child nodes. Runs serially so the graph shape is deterministic.
    ///
    /// An edge whose target module is still unsettled (deselected by a
    /// pending conflict) stays unattached; conflict resolution restarts it.
    pub(crate) fn attach_to_target_configurations(&mut self, edge: EdgeKey) {
        let Some(target) = self.edges[edge.0].target else {
            return;
        };
        if !self.is_selected(target) {
            return;
        }
        self.ensure_component_metadata(target);
        if let Some(failure) = self.components[target.0].metadata_failure.clone() {
            self.edges[edge.0].failure = Some(failure);
            self.remove_unattached(edge);
            return;
        }
        let Some(metadata) = self.components[target.0].metadata.clone() else {
            return;
        };
        let dep = self.edges[edge.0].dep.clone();
        let matched = self.matcher.select_configurations(&dep, &metadata);
        if matched.is_empty() {
            self.edges[edge.0].failure = Some(ResolveFailure::new(
                FailureKind::MetadataResolve,
                format!(
                    "no configuration of {} matches {}",
                    metadata.id,
                    dep.configuration.as_deref().unwrap_or("default")
                ),
            ));
            self.remove_unattached(edge);
            return;
        }
        for configuration in matched {
            let target_node = self.get_or_create_node(target, configuration);
            self.add_incoming_edge(target_node, edge);
        }
        self.remove_unattached(edge);
    }

    /// Re-point the edge at the module's new selection and re-attach.
    pub(crate) fn restart_edge(&mut self, edge: EdgeKey, winner: ComponentKey) {
        self.detach_edge(edge);
        self.edges[edge.0].target = Some(winner);
        self.edges[edge.0].failure = None;
        if self.node_is_selected(self.edges[edge.0].from) {
            self.add_unattached(edge);
            self.attach_to_target_configurations(edge);
        }
    }
}
