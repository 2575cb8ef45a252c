//! The dependency graph builder: drives traversal, selection, batched
//! conflict resolution, validation, and result assembly.

use std::sync::Arc;

use keel_core::module::ModuleId;
use keel_core::version::ModuleVersion;
use keel_util::errors::{KeelError, KeelResult};

use crate::component::VisitState;
use crate::conflicts::{
    CapabilitiesConflictHandler, CapabilitiesConflictResolver, ForcedVersionResolver,
    LatestCapabilityResolver, LatestVersionResolver, ModuleConflictHandler,
    ModuleConflictResolver,
};
use crate::queue::{InlineWorkQueue, MetadataFetch, WorkQueue};
use crate::resolvers::{
    AcceptAllEdges, ConfigurationMatcher, ContextResolver, DefaultConfigurationMatcher,
    DependencySubstitution, EdgeFilter, FailureKind, IdResolver, MetadataResolver,
    ModuleReplacements, NoSubstitution, ResolveContext, ResolveFailure,
};
use crate::state::{ComponentKey, EdgeKey, ModuleKey, NodeKey, ResolveState, SelectorKey};
use crate::visit::GraphVisitor;

/// Builds dependency graphs. Construct once with the external resolvers,
/// then call [`GraphBuilder::resolve`] per resolution; each call works on a
/// fresh [`ResolveState`].
pub struct GraphBuilder {
    id_resolver: Arc<dyn IdResolver>,
    metadata_resolver: Arc<dyn MetadataResolver>,
    context_resolver: Arc<dyn ContextResolver>,
    matcher: Arc<dyn ConfigurationMatcher>,
    edge_filter: Arc<dyn EdgeFilter>,
    substitution: Arc<dyn DependencySubstitution>,
    replacements: ModuleReplacements,
    module_resolver: Arc<dyn ModuleConflictResolver>,
    capabilities_resolver: Arc<dyn CapabilitiesConflictResolver>,
    work_queue: Arc<dyn WorkQueue>,
}

impl GraphBuilder {
    pub fn new(
        id_resolver: Arc<dyn IdResolver>,
        metadata_resolver: Arc<dyn MetadataResolver>,
        context_resolver: Arc<dyn ContextResolver>,
    ) -> Self {
        Self {
            id_resolver,
            metadata_resolver,
            context_resolver,
            matcher: Arc::new(DefaultConfigurationMatcher),
            edge_filter: Arc::new(AcceptAllEdges),
            substitution: Arc::new(NoSubstitution),
            replacements: ModuleReplacements::default(),
            module_resolver: Arc::new(LatestVersionResolver),
            capabilities_resolver: Arc::new(LatestCapabilityResolver),
            work_queue: Arc::new(InlineWorkQueue),
        }
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn ConfigurationMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_edge_filter(mut self, filter: Arc<dyn EdgeFilter>) -> Self {
        self.edge_filter = filter;
        self
    }

    pub fn with_substitution(mut self, substitution: Arc<dyn DependencySubstitution>) -> Self {
        self.substitution = substitution;
        self
    }

    pub fn with_replacements(mut self, replacements: ModuleReplacements) -> Self {
        self.replacements = replacements;
        self
    }

    pub fn with_module_conflict_resolver(
        mut self,
        resolver: Arc<dyn ModuleConflictResolver>,
    ) -> Self {
        self.module_resolver = resolver;
        self
    }

    pub fn with_capabilities_conflict_resolver(
        mut self,
        resolver: Arc<dyn CapabilitiesConflictResolver>,
    ) -> Self {
        self.capabilities_resolver = resolver;
        self
    }

    pub fn with_work_queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.work_queue = queue;
        self
    }

    /// Resolve the context's dependency graph and stream it to the visitor.
    pub fn resolve(
        &self,
        context: &ResolveContext,
        visitor: &mut dyn GraphVisitor,
    ) -> KeelResult<()> {
        let root = self
            .context_resolver
            .resolve(context)
            .map_err(|failure| KeelError::Resolution {
                message: format!("cannot resolve root of {}: {failure}", context.name),
            })?;

        let mut state = ResolveState::new(
            root,
            self.id_resolver.clone(),
            self.metadata_resolver.clone(),
            self.matcher.clone(),
            self.edge_filter.clone(),
            self.substitution.clone(),
        );
        let mut module_conflicts =
            ModuleConflictHandler::new(self.replacements.clone(), self.module_resolver.clone());
        // Forced picks are honored before the version strategy runs.
        module_conflicts.register_resolver(Arc::new(ForcedVersionResolver));
        let mut capability_conflicts =
            CapabilitiesConflictHandler::new(self.capabilities_resolver.clone());

        self.traverse_graph(&mut state, &mut module_conflicts, &mut capability_conflicts)?;
        self.validate_graph(&state)?;
        self.assemble_result(&mut state, visitor);
        Ok(())
    }

    /// The outer loop: drain pending nodes; when none are left, settle one
    /// batched conflict and keep going until everything is quiescent.
    ///
    /// Conflicts are deferred until the node queue drains so selection sees
    /// as many competing selectors as possible. Capability conflicts run
    /// after module conflicts since they presume concrete version choices.
    fn traverse_graph(
        &self,
        state: &mut ResolveState,
        module_conflicts: &mut ModuleConflictHandler,
        capability_conflicts: &mut CapabilitiesConflictHandler,
    ) -> KeelResult<()> {
        while state.peek().is_some()
            || module_conflicts.has_conflicts()
            || capability_conflicts.has_conflicts()
        {
            if let Some(node) = state.pop() {
                tracing::debug!("visiting configuration {}", state.node_label(node));
                let component = state.node(node).component_key();
                self.register_capabilities(state, capability_conflicts, component);
                let edges = state.visit_outgoing_dependencies(node);
                self.resolve_edges(state, module_conflicts, node, &edges)?;
            } else if module_conflicts.has_conflicts() {
                module_conflicts
                    .resolve_next(state)
                    .map_err(fatal)?;
            } else {
                capability_conflicts
                    .resolve_next(state)
                    .map_err(fatal)?;
            }
        }
        Ok(())
    }

    /// Most modules declare no capabilities, so providers are only seeded
    /// when a declaration names an existing module's identity.
    fn register_capabilities(
        &self,
        state: &mut ResolveState,
        handler: &mut CapabilitiesConflictHandler,
        component: ComponentKey,
    ) {
        let Some(metadata) = state.component(component).metadata().cloned() else {
            return;
        };
        for capability in &metadata.capabilities {
            let implicit: Vec<ComponentKey> = state
                .module_by_id(&ModuleId::new(
                    capability.group.clone(),
                    capability.name.clone(),
                ))
                .map(|module| module.versions().to_vec())
                .unwrap_or_default();
            let conflict = handler.register_candidate(state, component, capability, &implicit);
            if conflict.conflict_exists() {
                conflict.with_participating_modules(state);
            }
        }
    }

    /// Resolve a node's freshly discovered edges: serial selection, parallel
    /// metadata prefetch, serial attachment.
    fn resolve_edges(
        &self,
        state: &mut ResolveState,
        module_conflicts: &mut ModuleConflictHandler,
        node: NodeKey,
        edges: &[EdgeKey],
    ) -> KeelResult<()> {
        if edges.is_empty() {
            return Ok(());
        }
        // Selection mutates module state and the conflict queues, so it
        // must stay serial.
        for &edge in edges {
            debug_assert!(state.edge(edge).target_component().is_none());
            self.perform_selection(state, module_conflicts, edge)?;
            state.add_unattached(edge);
        }
        self.prefetch_metadata(state, node, edges)?;
        // Attachment order is the declaration order, keeping the graph
        // shape reproducible.
        for &edge in edges {
            if state.edge(edge).target_component().is_some() {
                state.attach_to_target_configurations(edge);
            }
        }
        Ok(())
    }

    /// Resolve a target component for one edge. A failed id
    /// resolve is recorded on the selector and traversal continues.
    fn perform_selection(
        &self,
        state: &mut ResolveState,
        module_conflicts: &mut ModuleConflictHandler,
        edge: EdgeKey,
    ) -> KeelResult<()> {
        let selector = state.edge(edge).selector_key();

        // Selector already resolved: just point the edge at its pick.
        if let Some(previous) = state.selector(selector).selected_component() {
            state.start_edge(edge, previous);
            return Ok(());
        }

        let result = state.resolve_selector(selector);
        if let Some(failure) = &result.failure {
            tracing::debug!("selector resolution failed: {failure}");
            return Ok(());
        }
        let (Some(id), Some(version_id)) = (result.id, result.version_id) else {
            return Ok(());
        };
        let candidate = state.get_revision(id, version_id, result.metadata);

        let module = state.selector(selector).target_module_key();
        let current = state.module(module).selected();

        state.start_edge(edge, candidate);
        state.select_by(selector, candidate);

        let Some(current) = current else {
            // First time the module is seen; select unless replacements
            // already put it in conflict.
            if !self.module_has_conflicts(state, module_conflicts, module) {
                tracing::debug!("selecting new module {}", state.module(module).id());
                state.select_component(module, candidate);
                // A module's very first selector can already reject its pick.
                state.maybe_mark_rejected(candidate);
            }
            return Ok(());
        };

        let chosen = self.choose_best(state, module_conflicts, module, selector, current, candidate)?;

        if chosen == current {
            state.start_edge(edge, current);
            state.select_by(selector, current);
            state.maybe_mark_rejected(current);
            return Ok(());
        }

        // The candidate displaces the current selection: prune the old
        // subtree and reselect.
        debug_assert_eq!(chosen, candidate);
        state.deselect_version(module);
        state.restart_module(module, candidate);
        state.maybe_mark_rejected(candidate);
        Ok(())
    }

    /// Choose between the module's current selection and a new candidate,
    /// considering every selector registered for the module.
    fn choose_best(
        &self,
        state: &ResolveState,
        module_conflicts: &ModuleConflictHandler,
        module: ModuleKey,
        selector: SelectorKey,
        current: ComponentKey,
        candidate: ComponentKey,
    ) -> KeelResult<ComponentKey> {
        if current == candidate {
            return Ok(candidate);
        }
        // A selector that already admits the current pick keeps it.
        if selector_agrees_with(state, selector, current) {
            return Ok(current);
        }
        // Every other selector admitting the candidate promotes it.
        if all_selectors_agree_with(state, module, candidate) {
            return Ok(candidate);
        }
        let candidates = [current, candidate];
        module_conflicts
            .select_among(state, &candidates)
            .map_err(fatal)
    }

    fn module_has_conflicts(
        &self,
        state: &mut ResolveState,
        module_conflicts: &mut ModuleConflictHandler,
        module: ModuleKey,
    ) -> bool {
        let conflict = module_conflicts.register_candidate(state, module);
        if conflict.conflict_exists() {
            tracing::debug!("found conflicting module {}", state.module(module).id());
            conflict.with_participating_modules(state);
            true
        } else {
            false
        }
    }

    /// Partition edges whose selected target still needs metadata and fetch
    /// in parallel when there is more than one; a single fetch is not worth
    /// the scheduling overhead.
    fn prefetch_metadata(
        &self,
        state: &mut ResolveState,
        node: NodeKey,
        edges: &[EdgeKey],
    ) -> KeelResult<()> {
        let mut requiring_download: Vec<ComponentKey> = Vec::new();
        for &edge in edges {
            let Some(target) = state.edge(edge).target_component() else {
                continue;
            };
            if !state.is_selected(target) || state.component(target).already_resolved() {
                continue;
            }
            if self
                .metadata_resolver
                .is_fetching_cheap(state.component(target).id())
            {
                continue;
            }
            if !requiring_download.contains(&target) {
                requiring_download.push(target);
            }
        }
        if requiring_download.len() <= 1 {
            return Ok(());
        }
        tracing::debug!(
            "submitting {} metadata fetches in parallel for {}",
            requiring_download.len(),
            state.node_label(node)
        );
        let work: Vec<MetadataFetch> = requiring_download
            .into_iter()
            .map(|component| MetadataFetch {
                component,
                id: state.component(component).id().clone(),
                resolver: self.metadata_resolver.clone(),
            })
            .collect();
        let outcomes = self.work_queue.run_all(work)?;
        for outcome in outcomes {
            state.apply_metadata_outcome(outcome);
        }
        Ok(())
    }

    /// After the loop quiesces, a selected component refused by a reject
    /// constraint fails the whole resolution.
    fn validate_graph(&self, state: &ResolveState) -> KeelResult<()> {
        for module in state.modules() {
            if let Some(selected) = module.selected() {
                if state.component(selected).is_rejected() {
                    return Err(KeelError::RejectedSelection {
                        message: format!(
                            "module {} resolved to {}, which a reject constraint refuses",
                            module.id(),
                            state.component(selected).version_id()
                        ),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Emit the final graph: selectors, selected nodes, then each selected
    /// node's edges while components are walked consumers-first. The
    /// tri-state marker tolerates cycles: a back-edge onto a component that
    /// is already being visited is simply skipped.
    fn assemble_result(&self, state: &mut ResolveState, visitor: &mut dyn GraphVisitor) {
        let root = state.root_node();
        visitor.start(state, root);

        for selector in state.selector_keys() {
            visitor.visit_selector(state, selector);
        }
        for node in state.node_keys() {
            if state.node_is_selected(node) {
                visitor.visit_node(state, node);
            }
        }

        let mut queue: Vec<ComponentKey> = Vec::new();
        for module in state.module_keys() {
            if let Some(selected) = state.module(module).selected() {
                queue.push(selected);
            }
        }

        while let Some(&component) = queue.first() {
            match state.component(component).visit_state() {
                VisitState::NotSeen => {
                    state.set_visit_state(component, VisitState::Visiting);
                    let mut pos = 0;
                    let nodes = state.component(component).nodes().to_vec();
                    for node in nodes {
                        if !state.node_is_selected(node) {
                            continue;
                        }
                        let incoming = state.node(node).incoming_edges().to_vec();
                        for edge in incoming {
                            let consumer =
                                state.node(state.edge(edge).from_node()).component_key();
                            if state.component(consumer).visit_state() == VisitState::NotSeen {
                                queue.insert(pos, consumer);
                                pos += 1;
                            }
                        }
                    }
                    if pos == 0 {
                        // No unvisited consumers: this component is next.
                        state.set_visit_state(component, VisitState::Visited);
                        queue.remove(0);
                        visit_component_edges(state, visitor, component);
                    }
                }
                VisitState::Visiting => {
                    // All consumers have been handled since we were first
                    // seen (a cycle closes here).
                    state.set_visit_state(component, VisitState::Visited);
                    queue.remove(0);
                    visit_component_edges(state, visitor, component);
                }
                VisitState::Visited => {
                    queue.remove(0);
                }
            }
        }

        visitor.finish(state, root);
    }
}

fn visit_component_edges(
    state: &ResolveState,
    visitor: &mut dyn GraphVisitor,
    component: ComponentKey,
) {
    let nodes = state.component(component).nodes().to_vec();
    for node in nodes {
        if state.node_is_selected(node) {
            visitor.visit_edges(state, node);
        }
    }
}

/// Map a recorded failure that turned fatal onto the unified error type.
fn fatal(failure: ResolveFailure) -> miette::Report {
    let error = match failure.kind {
        FailureKind::IdResolve => KeelError::Resolution {
            message: failure.message,
        },
        FailureKind::MetadataResolve => KeelError::Metadata {
            message: failure.message,
        },
        FailureKind::RejectedSelection => KeelError::RejectedSelection {
            message: failure.message,
        },
        FailureKind::ConflictResolver => KeelError::ConflictResolution {
            message: failure.message,
        },
    };
    error.into()
}

/// Whether this selector alone would re-confirm the given component: its
/// preferred selector needs no metadata, can short-circuit, and accepts the
/// component's version. Lets a range that contains the current pick keep it.
fn selector_agrees_with(
    state: &ResolveState,
    selector: SelectorKey,
    component: ComponentKey,
) -> bool {
    let Some(preferred) = &state.selector(selector).constraint().preferred else {
        return false;
    };
    if preferred.requires_metadata() || !preferred.can_short_circuit() {
        return false;
    }
    preferred.accepts(&ModuleVersion::parse(state.component(component).version()))
}

/// Whether every selector on the module that did not itself pick the
/// candidate would accept it (and none rejects it). At least one selector
/// must be consulted for this to hold.
fn all_selectors_agree_with(
    state: &ResolveState,
    module: ModuleKey,
    candidate: ComponentKey,
) -> bool {
    let version = ModuleVersion::parse(state.component(candidate).version());
    let mut consulted = false;
    for &selector in state.module(module).selectors() {
        if state.component(candidate).selected_by().contains(&selector) {
            continue;
        }
        consulted = true;
        let constraint = state.selector(selector).constraint();
        if let Some(preferred) = &constraint.preferred {
            if !preferred.can_short_circuit() || !preferred.accepts(&version) {
                return false;
            }
        }
        if let Some(rejected) = &constraint.rejected {
            if rejected.accepts(&version) {
                return false;
            }
        }
    }
    consulted
}
