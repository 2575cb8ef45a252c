//! Post-resolution dependency graph assembled from visitor callbacks.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Write as _};

use keel_core::module::{ModuleId, ModuleVersionId};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::resolvers::ResolveFailure;
use crate::state::{ComponentKey, NodeKey, ResolveState, SelectorKey};
use crate::visit::GraphVisitor;

/// A selected component in the resolved graph.
#[derive(Debug, Clone)]
pub struct ResolvedComponent {
    pub id: ModuleVersionId,
    /// Names of the configurations that participate in the graph.
    pub configurations: Vec<String>,
}

impl fmt::Display for ResolvedComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Edge label: everything the consumers asked for, comma-separated when
/// several declarations landed on the same target.
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub requested: String,
}

/// One hop in a dependency chain produced by [`ResolvedGraph::path_to`].
#[derive(Debug)]
pub struct PathSegment<'a> {
    pub component: &'a ResolvedComponent,
    /// What the consumer asked for; `None` at the root.
    pub requested: Option<&'a str>,
}

/// A resolved dependency graph backed by petgraph, one node per module.
pub struct ResolvedGraph {
    graph: DiGraph<ResolvedComponent, ResolvedDependency>,
    index: HashMap<ModuleId, NodeIndex>,
    root: Option<NodeIndex>,
}

impl ResolvedGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
            root: None,
        }
    }

    /// Intern a component by module identity; the first version registered
    /// for a module wins.
    pub fn insert_component(&mut self, component: ResolvedComponent) -> NodeIndex {
        match self.index.entry(component.id.module_id()) {
            Entry::Occupied(slot) => *slot.get(),
            Entry::Vacant(slot) => *slot.insert(self.graph.add_node(component)),
        }
    }

    pub fn set_root(&mut self, index: NodeIndex) {
        self.root = Some(index);
    }

    pub fn root(&self) -> Option<NodeIndex> {
        self.root
    }

    /// Record a dependency. Repeated declarations onto the same target merge
    /// their requested constraints into one edge label.
    pub fn link(&mut self, from: NodeIndex, to: NodeIndex, requested: String) {
        match self.graph.find_edge(from, to) {
            Some(edge) => {
                let label = &mut self.graph[edge].requested;
                if !label.split(", ").any(|existing| existing == requested) {
                    label.push_str(", ");
                    label.push_str(&requested);
                }
            }
            None => {
                self.graph.add_edge(from, to, ResolvedDependency { requested });
            }
        }
    }

    /// Look up a selected component by `group:name` coordinates, or by bare
    /// module name. An ambiguous bare name resolves to the lowest module id.
    pub fn find(&self, query: &str) -> Option<NodeIndex> {
        if let Some(id) = ModuleId::parse(query) {
            return self.index.get(&id).copied();
        }
        let mut best: Option<(&ModuleId, NodeIndex)> = None;
        for (id, &index) in &self.index {
            if id.name != query {
                continue;
            }
            if best.map_or(true, |(current, _)| id < current) {
                best = Some((id, index));
            }
        }
        best.map(|(_, index)| index)
    }

    pub fn component(&self, index: NodeIndex) -> &ResolvedComponent {
        &self.graph[index]
    }

    /// Every selected component other than the root.
    pub fn components(&self) -> impl Iterator<Item = &ResolvedComponent> {
        let root = self.root;
        self.graph
            .node_indices()
            .filter(move |&index| Some(index) != root)
            .map(|index| &self.graph[index])
    }

    /// Direct dependencies of a component.
    pub fn dependencies_of(
        &self,
        index: NodeIndex,
    ) -> impl Iterator<Item = (NodeIndex, &ResolvedDependency)> + '_ {
        self.graph
            .edges_directed(index, Direction::Outgoing)
            .map(|e| (e.target(), e.weight()))
    }

    /// Reverse dependencies (who depends on this component).
    pub fn dependents_of(
        &self,
        index: NodeIndex,
    ) -> impl Iterator<Item = (NodeIndex, &ResolvedDependency)> + '_ {
        self.graph
            .edges_directed(index, Direction::Incoming)
            .map(|e| (e.source(), e.weight()))
    }

    /// Number of components (excluding the root).
    pub fn len(&self) -> usize {
        self.graph.node_count() - usize::from(self.root.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Print the dependency tree. Each line carries the requested
    /// constraint and, for multi-configuration components, the participating
    /// configurations. A back-edge onto a component already on the current
    /// path renders as `(*)` and is not descended into.
    pub fn print_tree(&self, max_depth: Option<usize>) -> String {
        let mut out = String::new();
        let Some(root) = self.root else {
            return out;
        };
        let _ = writeln!(out, "{}", self.graph[root]);
        let children: Vec<_> = self.dependencies_of(root).collect();
        let mut trail = Vec::new();
        for (position, (child, edge)) in children.iter().enumerate() {
            self.render_subtree(
                &mut out,
                *child,
                edge,
                "",
                position + 1 == children.len(),
                1,
                max_depth,
                &mut trail,
            );
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn render_subtree(
        &self,
        out: &mut String,
        index: NodeIndex,
        edge: &ResolvedDependency,
        prefix: &str,
        last: bool,
        depth: usize,
        max_depth: Option<usize>,
        trail: &mut Vec<NodeIndex>,
    ) {
        let branch = if last { "└── " } else { "├── " };
        let component = &self.graph[index];
        if trail.contains(&index) {
            let _ = writeln!(out, "{prefix}{branch}{component} (*)");
            return;
        }
        let _ = writeln!(
            out,
            "{prefix}{branch}{component} (requested {}){}",
            edge.requested,
            configuration_note(component)
        );
        if max_depth.is_some_and(|limit| depth >= limit) {
            return;
        }
        trail.push(index);
        let next_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
        let children: Vec<_> = self.dependencies_of(index).collect();
        for (position, (child, edge)) in children.iter().enumerate() {
            self.render_subtree(
                out,
                *child,
                edge,
                &next_prefix,
                position + 1 == children.len(),
                depth + 1,
                max_depth,
                trail,
            );
        }
        trail.pop();
    }

    /// Shortest dependency chain from the root to a component, answering
    /// "why is this in the graph". Each hop is labeled with what its
    /// consumer requested.
    pub fn path_to(&self, query: &str) -> Option<Vec<PathSegment<'_>>> {
        let root = self.root?;
        let target = self.find(query)?;
        let mut predecessor: HashMap<NodeIndex, (NodeIndex, EdgeIndex)> = HashMap::new();
        let mut frontier = VecDeque::from([root]);
        'search: while let Some(current) = frontier.pop_front() {
            for edge in self.graph.edges(current) {
                let next = edge.target();
                if next == root || predecessor.contains_key(&next) {
                    continue;
                }
                predecessor.insert(next, (current, edge.id()));
                if next == target {
                    break 'search;
                }
                frontier.push_back(next);
            }
        }
        if target != root && !predecessor.contains_key(&target) {
            return None;
        }
        let mut chain = Vec::new();
        let mut cursor = target;
        while cursor != root {
            let &(parent, edge) = predecessor.get(&cursor)?;
            chain.push(PathSegment {
                component: &self.graph[cursor],
                requested: Some(self.graph[edge].requested.as_str()),
            });
            cursor = parent;
        }
        chain.push(PathSegment {
            component: &self.graph[root],
            requested: None,
        });
        chain.reverse();
        Some(chain)
    }
}

impl Default for ResolvedGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn configuration_note(component: &ResolvedComponent) -> String {
    if component.configurations.iter().all(|c| c == "default") {
        String::new()
    } else {
        format!(" [{}]", component.configurations.join(", "))
    }
}

/// The assembled graph plus every failure recorded along the way.
pub struct ResolutionReport {
    pub graph: ResolvedGraph,
    pub failures: Vec<ResolveFailure>,
}

/// Builds a [`ResolvedGraph`] while the engine assembles its result.
#[derive(Default)]
pub struct GraphCollector {
    graph: ResolvedGraph,
    failures: Vec<ResolveFailure>,
    indices: HashMap<ComponentKey, NodeIndex>,
}

impl GraphCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_report(self) -> ResolutionReport {
        ResolutionReport {
            graph: self.graph,
            failures: self.failures,
        }
    }

    fn intern(&mut self, state: &ResolveState, component: ComponentKey) -> NodeIndex {
        if let Some(&index) = self.indices.get(&component) {
            return index;
        }
        let index = self.graph.insert_component(ResolvedComponent {
            id: state.component(component).version_id().clone(),
            configurations: Vec::new(),
        });
        self.indices.insert(component, index);
        index
    }

    fn record_failure(&mut self, failure: &ResolveFailure) {
        if !self.failures.iter().any(|f| f.message == failure.message) {
            self.failures.push(failure.clone());
        }
    }
}

impl GraphVisitor for GraphCollector {
    fn start(&mut self, state: &ResolveState, root: NodeKey) {
        let component = state.node(root).component_key();
        let index = self.intern(state, component);
        self.graph.set_root(index);
    }

    fn visit_selector(&mut self, state: &ResolveState, selector: SelectorKey) {
        if let Some(failure) = state.selector_failure(selector) {
            let failure = failure.clone();
            self.record_failure(&failure);
        }
    }

    fn visit_node(&mut self, state: &ResolveState, node: NodeKey) {
        let component = state.node(node).component_key();
        let index = self.intern(state, component);
        let name = state.node(node).configuration_name().to_string();
        let configurations = &mut self.graph.graph[index].configurations;
        if !configurations.contains(&name) {
            configurations.push(name);
        }
    }

    fn visit_edges(&mut self, state: &ResolveState, node: NodeKey) {
        let component = state.node(node).component_key();
        let to = self.intern(state, component);
        for &edge in state.node(node).incoming_edges() {
            let consumer = state.node(state.edge(edge).from_node()).component_key();
            let from = self.intern(state, consumer);
            let requested = state.edge(edge).requested().constraint.to_string();
            self.graph.link(from, to, requested);
        }
    }

    fn finish(&mut self, state: &ResolveState, _root: NodeKey) {
        for edge in state.edge_keys() {
            if let Some(failure) = state.edge_failure(edge) {
                let failure = failure.clone();
                self.record_failure(&failure);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(group: &str, name: &str, version: &str) -> ResolvedComponent {
        ResolvedComponent {
            id: ModuleVersionId::new(group, name, version),
            configurations: vec!["default".to_string()],
        }
    }

    #[test]
    fn insert_interns_by_module_identity() {
        let mut graph = ResolvedGraph::new();
        let first = graph.insert_component(component("org.example", "lib", "1.0"));
        let second = graph.insert_component(component("org.example", "lib", "2.0"));
        assert_eq!(first, second);
        assert_eq!(graph.component(first).id.version, "1.0");
    }

    #[test]
    fn find_by_coordinates_and_bare_name() {
        let mut graph = ResolvedGraph::new();
        let index = graph.insert_component(component("org.example", "my-lib", "1.0"));
        assert_eq!(graph.find("org.example:my-lib"), Some(index));
        assert_eq!(graph.find("my-lib"), Some(index));
        assert!(graph.find("absent").is_none());
    }

    #[test]
    fn ambiguous_bare_name_resolves_to_lowest_module_id() {
        let mut graph = ResolvedGraph::new();
        let beta = graph.insert_component(component("org.beta", "lib", "2.0"));
        let alpha = graph.insert_component(component("org.alpha", "lib", "1.0"));
        assert_eq!(graph.find("lib"), Some(alpha));
        assert_ne!(graph.find("lib"), Some(beta));
    }

    #[test]
    fn link_merges_repeated_declarations() {
        let mut graph = ResolvedGraph::new();
        let app = graph.insert_component(component("com.example", "app", "1.0"));
        let lib = graph.insert_component(component("org.example", "lib", "2.0"));
        graph.link(app, lib, "1.0".to_string());
        graph.link(app, lib, "[2.0,)".to_string());
        graph.link(app, lib, "1.0".to_string());

        let edges: Vec<_> = graph.dependencies_of(app).collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].1.requested, "1.0, [2.0,)");
    }

    #[test]
    fn tree_shows_requested_constraints_and_configurations() {
        let mut graph = ResolvedGraph::new();
        let root = graph.insert_component(component("com.example", "app", "1.0"));
        graph.set_root(root);
        let mut multi = component("org.a", "a", "1.0");
        multi.configurations = vec!["api".to_string(), "runtime".to_string()];
        let a = graph.insert_component(multi);
        graph.link(root, a, "[1.0,)".to_string());

        let tree = graph.print_tree(None);
        assert!(tree.contains("com.example:app:1.0"));
        assert!(tree.contains("org.a:a:1.0 (requested [1.0,)) [api, runtime]"));
    }

    #[test]
    fn tree_marks_cycles_and_terminates() {
        let mut graph = ResolvedGraph::new();
        let root = graph.insert_component(component("com.example", "app", "1.0"));
        graph.set_root(root);
        let a = graph.insert_component(component("org.a", "a", "1.0"));
        let b = graph.insert_component(component("org.b", "b", "1.0"));
        graph.link(root, a, "1.0".to_string());
        graph.link(a, b, "1.0".to_string());
        graph.link(b, a, "1.0".to_string());

        let tree = graph.print_tree(None);
        assert!(tree.contains("org.a:a:1.0 (*)"));
        assert_eq!(tree.matches("org.a:a:1.0").count(), 2);
    }

    #[test]
    fn depth_limit_stops_descent() {
        let mut graph = ResolvedGraph::new();
        let root = graph.insert_component(component("com.example", "app", "1.0"));
        graph.set_root(root);
        let a = graph.insert_component(component("org.a", "a", "1.0"));
        let b = graph.insert_component(component("org.b", "b", "1.0"));
        graph.link(root, a, "1.0".to_string());
        graph.link(a, b, "1.0".to_string());

        let tree = graph.print_tree(Some(1));
        assert!(tree.contains("org.a:a:1.0"));
        assert!(!tree.contains("org.b:b:1.0"));
    }

    #[test]
    fn path_to_prefers_the_shortest_chain() {
        let mut graph = ResolvedGraph::new();
        let root = graph.insert_component(component("com.example", "app", "1.0"));
        graph.set_root(root);
        let a = graph.insert_component(component("org.a", "a", "1.0"));
        let c = graph.insert_component(component("org.c", "c", "3.0"));
        graph.link(root, a, "1.0".to_string());
        graph.link(a, c, "[3.0,)".to_string());
        graph.link(root, c, "3.0".to_string());

        let chain = graph.path_to("org.c:c").unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].component.id.name, "app");
        assert!(chain[0].requested.is_none());
        assert_eq!(chain[1].component.id.name, "c");
        assert_eq!(chain[1].requested, Some("3.0"));
        assert!(graph.path_to("org.missing:lib").is_none());
    }

    #[test]
    fn dependents_lookup() {
        let mut graph = ResolvedGraph::new();
        let root = graph.insert_component(component("com.example", "app", "1.0"));
        graph.set_root(root);
        let a = graph.insert_component(component("org.a", "a", "1.0"));
        graph.link(root, a, "1.0".to_string());

        let dependents: Vec<_> = graph.dependents_of(a).collect();
        assert_eq!(dependents.len(), 1);
        assert_eq!(graph.component(dependents[0].0).id.name, "app");
        assert_eq!(graph.len(), 1);
        assert!(!graph.is_empty());
    }
}
