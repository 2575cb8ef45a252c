//! Output contract for assembled graphs.

use crate::state::{NodeKey, ResolveState, SelectorKey};

/// Receives the resolved graph in a fixed order: `start`, every selector,
/// every selected node, then each selected node's incoming edges while
/// components are walked consumers-first, then `finish`.
///
/// All methods default to no-ops so visitors only implement what they need.
pub trait GraphVisitor {
    fn start(&mut self, _state: &ResolveState, _root: NodeKey) {}

    fn visit_selector(&mut self, _state: &ResolveState, _selector: SelectorKey) {}

    fn visit_node(&mut self, _state: &ResolveState, _node: NodeKey) {}

    /// Called exactly once per selected node; the node's incoming edges are
    /// final at this point.
    fn visit_edges(&mut self, _state: &ResolveState, _node: NodeKey) {}

    fn finish(&mut self, _state: &ResolveState, _root: NodeKey) {}
}
