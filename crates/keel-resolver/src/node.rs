//! A configuration of a component participating in traversal.

use crate::state::{ComponentKey, EdgeKey, NodeKey, ResolveState};

pub struct NodeState {
    pub(crate) key: NodeKey,
    pub(crate) component: ComponentKey,
    /// Index into the owning component's configuration list.
    pub(crate) configuration: usize,
    configuration_name: String,
    pub(crate) incoming: Vec<EdgeKey>,
    pub(crate) outgoing: Vec<EdgeKey>,
    pub(crate) queued: bool,
    /// Set once outgoing edges exist for the current selection state;
    /// cleared whenever the subtree is pruned so a re-visit rebuilds it.
    pub(crate) traversed: bool,
    pub(crate) root: bool,
}

impl NodeState {
    pub(crate) fn new(
        key: NodeKey,
        component: ComponentKey,
        configuration: usize,
        configuration_name: String,
    ) -> Self {
        Self {
            key,
            component,
            configuration,
            configuration_name,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            queued: false,
            traversed: false,
            root: false,
        }
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn component_key(&self) -> ComponentKey {
        self.component
    }

    pub fn configuration_name(&self) -> &str {
        &self.configuration_name
    }

    pub fn incoming_edges(&self) -> &[EdgeKey] {
        &self.incoming
    }

    pub fn outgoing_edges(&self) -> &[EdgeKey] {
        &self.outgoing
    }

    pub fn is_root(&self) -> bool {
        self.root
    }
}

impl ResolveState {
    /// Enumerate and create this node's outgoing edges, in declaration
    /// order. A node that lost its last incoming edge (or whose component
    /// lost selection) prunes its subtree instead.
    pub(crate) fn visit_outgoing_dependencies(&mut self, node: NodeKey) -> Vec<EdgeKey> {
        let is_root = self.nodes[node.0].root;
        if !is_root
            && (self.nodes[node.0].incoming.is_empty() || !self.node_is_selected(node))
        {
            self.remove_outgoing_edges(node);
            return Vec::new();
        }
        if self.nodes[node.0].traversed {
            return Vec::new();
        }
        self.remove_outgoing_edges(node);

        let component = self.nodes[node.0].component;
        let Some(metadata) = self.components[component.0].metadata.clone() else {
            return Vec::new();
        };
        let Some(configuration) = metadata
            .configurations
            .get(self.nodes[node.0].configuration)
        else {
            return Vec::new();
        };

        let mut discovered = Vec::new();
        for (index, declared) in configuration.dependencies.iter().enumerate() {
            if !self.edge_filter.accept(declared) {
                continue;
            }
            let dep = self
                .substitution
                .substitute(declared)
                .unwrap_or_else(|| declared.clone());
            if self.defer_if_pending(node, &dep) {
                continue;
            }
            let selector = self.selector_for(node, index, &dep);
            let edge = self.new_edge(node, dep, selector);
            self.nodes[node.0].outgoing.push(edge);
            discovered.push(edge);
        }
        self.nodes[node.0].traversed = true;
        discovered
    }

    /// Drop all outgoing edges, detaching them from their targets.
    pub(crate) fn remove_outgoing_edges(&mut self, node: NodeKey) {
        let outgoing = std::mem::take(&mut self.nodes[node.0].outgoing);
        for edge in outgoing {
            self.detach_edge(edge);
        }
        self.nodes[node.0].traversed = false;
    }

    /// Attach an edge as incoming on a target node, scheduling the target.
    pub(crate) fn add_incoming_edge(&mut self, node: NodeKey, edge: EdgeKey) {
        self.nodes[node.0].incoming.push(edge);
        self.edges[edge.0].target_nodes.push(node);
        self.on_more_selected(node);
    }

    pub(crate) fn remove_incoming_edge(&mut self, node: NodeKey, edge: EdgeKey) {
        self.nodes[node.0].incoming.retain(|&e| e != edge);
        self.on_fewer_selected(node);
    }

    /// Called when the owning component loses selection: the node's subtree
    /// is no longer wanted.
    pub(crate) fn deselect_node(&mut self, node: NodeKey) {
        self.remove_outgoing_edges(node);
    }
}
