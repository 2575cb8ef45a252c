//! Per-module resolution state: known versions, competing selectors, the
//! current pick, and the pending-dependency gate.

use keel_core::dependency::DependencySpec;
use keel_core::module::ModuleId;
use keel_core::version::ModuleVersion;

use crate::selector::SelectorResults;
use crate::state::{ComponentKey, EdgeKey, ModuleKey, NodeKey, ResolveState, SelectorKey};

pub struct ModuleResolveState {
    pub(crate) key: ModuleKey,
    id: ModuleId,
    /// Every component version seen for this module, in discovery order.
    pub(crate) versions: Vec<ComponentKey>,
    /// Every selector targeting this module, in creation order.
    pub(crate) selectors: Vec<SelectorKey>,
    pub(crate) selected: Option<ComponentKey>,
    /// Edges resolved to this module but not yet attached to configurations.
    pub(crate) unattached: Vec<EdgeKey>,
    pub(crate) results: SelectorResults,
    /// Nodes whose optional declarations on this module are waiting for a
    /// hard edge to appear.
    pub(crate) pending_nodes: Vec<NodeKey>,
    /// Whether any hard (non-optional) declaration references this module.
    pub(crate) hard: bool,
}

impl ModuleResolveState {
    pub(crate) fn new(key: ModuleKey, id: ModuleId) -> Self {
        Self {
            key,
            id,
            versions: Vec::new(),
            selectors: Vec::new(),
            selected: None,
            unattached: Vec::new(),
            results: SelectorResults::default(),
            pending_nodes: Vec::new(),
            hard: false,
        }
    }

    pub fn key(&self) -> ModuleKey {
        self.key
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn selected(&self) -> Option<ComponentKey> {
        self.selected
    }

    pub fn versions(&self) -> &[ComponentKey] {
        &self.versions
    }

    pub fn selectors(&self) -> &[SelectorKey] {
        &self.selectors
    }
}

impl ResolveState {
    /// Make `component` the module's first selection.
    pub(crate) fn select_component(&mut self, module: ModuleKey, component: ComponentKey) {
        debug_assert!(self.modules[module.0].selected.is_none());
        self.modules[module.0].selected = Some(component);
    }

    /// Deselect the module's current pick and prune its subtree. This is the
    /// broadcast action conflict registration runs on every participant.
    pub(crate) fn deselect_version(&mut self, module: ModuleKey) {
        let Some(previous) = self.modules[module.0].selected.take() else {
            return;
        };
        tracing::debug!(
            "deselecting {} for module {}",
            self.components[previous.0].version_id(),
            self.modules[module.0].id()
        );
        let nodes = self.components[previous.0].nodes.clone();
        for node in nodes {
            self.deselect_node(node);
        }
    }

    /// Replace the module's selection with `winner`, retargeting selectors
    /// and edges and rescheduling the winner's nodes.
    pub(crate) fn restart_module(&mut self, module: ModuleKey, winner: ComponentKey) {
        tracing::debug!(
            "restarting module {} with {}",
            self.modules[module.0].id(),
            self.components[winner.0].version_id()
        );
        self.modules[module.0].selected = Some(winner);

        // Every selector that had resolved to some version of this module
        // now points at the winner.
        let selectors = self.modules[module.0].selectors.clone();
        for selector in selectors {
            if self.selectors[selector.0].selected.is_some() {
                self.select_by(selector, winner);
            }
        }

        let versions = self.modules[module.0].versions.clone();
        for component in versions {
            if component == winner {
                let nodes = self.components[component.0].nodes.clone();
                for node in nodes {
                    self.on_more_selected(node);
                }
            } else {
                let nodes = self.components[component.0].nodes.clone();
                for node in nodes {
                    let incoming = std::mem::take(&mut self.nodes[node.0].incoming);
                    for edge in incoming {
                        self.edges[edge.0].target_nodes.retain(|&n| n != node);
                        self.restart_edge(edge, winner);
                    }
                }
            }
        }

        // Edges that never reached a configuration now have a settled target.
        let unattached = std::mem::take(&mut self.modules[module.0].unattached);
        for edge in unattached {
            self.restart_edge(edge, winner);
        }
    }

    /// Gate for optional declarations: an optional
    /// dependency on a module nothing hard references yet is parked on the
    /// declaring node. The first hard declaration releases the parked nodes
    /// for re-traversal.
    pub(crate) fn defer_if_pending(&mut self, node: NodeKey, dep: &DependencySpec) -> bool {
        let module = self.get_module(&dep.target);
        if !dep.optional {
            self.modules[module.0].hard = true;
            let pending = std::mem::take(&mut self.modules[module.0].pending_nodes);
            if !pending.is_empty() {
                tracing::debug!(
                    "releasing {} pending declarations on {}",
                    pending.len(),
                    self.modules[module.0].id()
                );
            }
            for parked in pending {
                self.nodes[parked.0].traversed = false;
                self.on_more_selected(parked);
            }
            return false;
        }
        if self.modules[module.0].hard {
            return false;
        }
        if !self.modules[module.0].pending_nodes.contains(&node) {
            self.modules[module.0].pending_nodes.push(node);
        }
        true
    }

    /// Scan the module's selectors; a version refused by any reject selector
    /// (or outside a strict preferred selector) marks the component rejected.
    /// Already-rejected components are skipped.
    pub(crate) fn maybe_mark_rejected(&mut self, component: ComponentKey) {
        if self.components[component.0].rejected {
            return;
        }
        let version = ModuleVersion::parse(self.components[component.0].version());
        let module = self.components[component.0].module;
        let mut rejected = false;
        for &selector in &self.modules[module.0].selectors {
            let constraint = &self.selectors[selector.0].dep.constraint;
            if let Some(reject) = &constraint.rejected {
                if reject.accepts(&version) {
                    rejected = true;
                    break;
                }
            }
            if constraint.strict {
                if let Some(preferred) = &constraint.preferred {
                    if preferred.can_short_circuit() && !preferred.accepts(&version) {
                        rejected = true;
                        break;
                    }
                }
            }
        }
        if rejected {
            tracing::debug!(
                "rejecting {} for module {}",
                self.components[component.0].version_id(),
                self.modules[module.0].id()
            );
            self.components[component.0].rejected = true;
        }
    }
}
