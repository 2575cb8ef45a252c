//! Batched conflict queues and the pluggable resolvers that settle them.
//!
//! Module conflicts come from module replacements (one module id superseding
//! another); capability conflicts come from two modules co-providing the
//! same capability. Both are queued at registration time, after deselecting
//! every participant so their subtrees are pruned, and drained one at a time
//! once the node queue is empty.

use std::collections::VecDeque;
use std::sync::Arc;

use keel_core::metadata::Capability;
use keel_core::version::ModuleVersion;

use crate::resolvers::{FailureKind, ModuleReplacements, ResolveFailure};
use crate::state::{ComponentKey, ModuleKey, ResolveState};

/// Outcome of registering a candidate with a conflict handler.
pub struct PotentialConflict {
    participants: Vec<ModuleKey>,
}

impl PotentialConflict {
    fn none() -> Self {
        Self {
            participants: Vec::new(),
        }
    }

    pub fn conflict_exists(&self) -> bool {
        !self.participants.is_empty()
    }

    /// Run the deselect action on every module drawn into the conflict.
    pub(crate) fn with_participating_modules(&self, state: &mut ResolveState) {
        for &module in &self.participants {
            state.deselect_version(module);
        }
    }
}

/// Chooses among competing components for one module. Return `Ok(None)` to
/// pass the decision on to the next resolver in the chain.
pub trait ModuleConflictResolver {
    fn select(
        &self,
        state: &ResolveState,
        candidates: &[ComponentKey],
    ) -> Result<Option<ComponentKey>, ResolveFailure>;
}

/// Prefers a candidate pinned by a force selector. More than one forced
/// candidate is unresolvable.
pub struct ForcedVersionResolver;

impl ModuleConflictResolver for ForcedVersionResolver {
    fn select(
        &self,
        state: &ResolveState,
        candidates: &[ComponentKey],
    ) -> Result<Option<ComponentKey>, ResolveFailure> {
        let mut forced = candidates.iter().copied().filter(|&candidate| {
            state
                .component(candidate)
                .selected_by()
                .iter()
                .any(|&selector| state.selector(selector).is_force())
        });
        match (forced.next(), forced.next()) {
            (Some(only), None) => Ok(Some(only)),
            (Some(first), Some(second)) => Err(ResolveFailure::new(
                FailureKind::ConflictResolver,
                format!(
                    "both {} and {} are forced",
                    state.component(first).version_id(),
                    state.component(second).version_id()
                ),
            )),
            (None, _) => Ok(None),
        }
    }
}

/// Default strategy: the highest version wins.
pub struct LatestVersionResolver;

impl ModuleConflictResolver for LatestVersionResolver {
    fn select(
        &self,
        state: &ResolveState,
        candidates: &[ComponentKey],
    ) -> Result<Option<ComponentKey>, ResolveFailure> {
        Ok(candidates
            .iter()
            .copied()
            .max_by_key(|&candidate| ModuleVersion::parse(state.component(candidate).version())))
    }
}

/// Chooses among components co-providing a capability.
pub trait CapabilitiesConflictResolver {
    fn select(
        &self,
        state: &ResolveState,
        candidates: &[ComponentKey],
    ) -> Result<Option<ComponentKey>, ResolveFailure>;
}

/// Default capability strategy: the provider with the highest version wins.
pub struct LatestCapabilityResolver;

impl CapabilitiesConflictResolver for LatestCapabilityResolver {
    fn select(
        &self,
        state: &ResolveState,
        candidates: &[ComponentKey],
    ) -> Result<Option<ComponentKey>, ResolveFailure> {
        Ok(candidates
            .iter()
            .copied()
            .max_by_key(|&candidate| ModuleVersion::parse(state.component(candidate).version())))
    }
}

struct ModuleConflict {
    participants: Vec<ModuleKey>,
    /// The module replacement target, when the conflict stems from the
    /// replacement map. Its components are the only viable winners.
    replacement_target: Option<ModuleKey>,
}

/// Batched queue of module conflicts with a pluggable resolver chain.
pub struct ModuleConflictHandler {
    resolvers: Vec<Arc<dyn ModuleConflictResolver>>,
    replacements: ModuleReplacements,
    conflicts: VecDeque<ModuleConflict>,
}

impl ModuleConflictHandler {
    pub fn new(replacements: ModuleReplacements, resolver: Arc<dyn ModuleConflictResolver>) -> Self {
        Self {
            resolvers: vec![resolver],
            replacements,
            conflicts: VecDeque::new(),
        }
    }

    /// Prepend a resolver so it is consulted before the existing chain.
    pub fn register_resolver(&mut self, resolver: Arc<dyn ModuleConflictResolver>) {
        self.resolvers.insert(0, resolver);
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Consult the replacement map for a newly-seen module. A module that is
    /// replaced by (or replaces) another module already in the graph starts
    /// a batched conflict.
    pub(crate) fn register_candidate(
        &mut self,
        state: &ResolveState,
        module: ModuleKey,
    ) -> PotentialConflict {
        let id = state.module(module).id().clone();
        let mut participants: Vec<ModuleKey> = Vec::new();
        let mut replacement_target = None;

        if let Some(target) = self.replacements.replacement_for(&id) {
            if let Some(other) = state.module_by_id(target) {
                participants = vec![module, other.key()];
                replacement_target = Some(other.key());
            }
        }
        if participants.is_empty() {
            for (source, target) in self.replacements.iter() {
                if *target == id {
                    if let Some(other) = state.module_by_id(source) {
                        participants = vec![other.key(), module];
                        replacement_target = Some(module);
                        break;
                    }
                }
            }
        }
        if participants.is_empty() {
            return PotentialConflict::none();
        }

        tracing::debug!(
            "module replacement conflict on {} ({} participants)",
            id,
            participants.len()
        );
        let already_queued = self
            .conflicts
            .iter()
            .any(|conflict| conflict.participants == participants);
        if !already_queued {
            self.conflicts.push_back(ModuleConflict {
                participants: participants.clone(),
                replacement_target,
            });
        }
        PotentialConflict { participants }
    }

    /// Pick among candidates using the resolver chain. Also used inline by
    /// best-choice selection between a current pick and a new candidate.
    pub(crate) fn select_among(
        &self,
        state: &ResolveState,
        candidates: &[ComponentKey],
    ) -> Result<ComponentKey, ResolveFailure> {
        for resolver in &self.resolvers {
            if let Some(winner) = resolver.select(state, candidates)? {
                return Ok(winner);
            }
        }
        Err(ResolveFailure::new(
            FailureKind::ConflictResolver,
            format!(
                "no resolver could choose among {} candidates",
                candidates.len()
            ),
        ))
    }

    /// Resolve one batched conflict, replacing every participant's selection
    /// with the winner.
    pub(crate) fn resolve_next(&mut self, state: &mut ResolveState) -> Result<(), ResolveFailure> {
        let Some(conflict) = self.conflicts.pop_front() else {
            return Ok(());
        };
        let candidate_modules = match conflict.replacement_target {
            Some(target) => vec![target],
            None => conflict.participants.clone(),
        };
        let mut candidates: Vec<ComponentKey> = Vec::new();
        for module in candidate_modules {
            for component in state.resolved_components(module)? {
                if !candidates.contains(&component) {
                    candidates.push(component);
                }
            }
        }
        if candidates.is_empty() {
            // Nothing resolved against the target yet; fall back to every
            // discovered version of the participants.
            for &module in &conflict.participants {
                for &component in state.module(module).versions() {
                    if !candidates.contains(&component) {
                        candidates.push(component);
                    }
                }
            }
        }
        let winner = self.select_among(state, &candidates)?;
        tracing::debug!(
            "module conflict resolved to {}",
            state.component(winner).version_id()
        );
        for module in winner_module_first(state, winner, conflict.participants) {
            state.replace_selection_with_conflict_result(module, winner);
        }
        Ok(())
    }
}

/// Order participants so the winner's own module settles first; edges of the
/// other participants can only re-attach once the winner is selected.
fn winner_module_first(
    state: &ResolveState,
    winner: ComponentKey,
    mut participants: Vec<ModuleKey>,
) -> Vec<ModuleKey> {
    let winner_module = state.component(winner).module_key();
    if let Some(position) = participants.iter().position(|&m| m == winner_module) {
        let module = participants.remove(position);
        participants.insert(0, module);
    }
    participants
}

struct CapabilityConflict {
    capability: String,
    components: Vec<ComponentKey>,
}

/// Batched queue of capability conflicts.
pub struct CapabilitiesConflictHandler {
    resolver: Arc<dyn CapabilitiesConflictResolver>,
    /// Providers seen per `group:name` capability, in registration order.
    providers: Vec<(String, Vec<ComponentKey>)>,
    conflicts: VecDeque<CapabilityConflict>,
}

impl CapabilitiesConflictHandler {
    pub fn new(resolver: Arc<dyn CapabilitiesConflictResolver>) -> Self {
        Self {
            resolver,
            providers: Vec::new(),
            conflicts: VecDeque::new(),
        }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Register a component as provider of a capability. A conflict exists
    /// once two distinct modules provide the same capability through
    /// components that are still live (selected, or awaiting reselection).
    pub(crate) fn register_candidate(
        &mut self,
        state: &ResolveState,
        component: ComponentKey,
        capability: &Capability,
        implicit_providers: &[ComponentKey],
    ) -> PotentialConflict {
        let key = format!("{}:{}", capability.group, capability.name);
        let index = match self.providers.iter().position(|(k, _)| *k == key) {
            Some(index) => index,
            None => {
                self.providers.push((key.clone(), Vec::new()));
                self.providers.len() - 1
            }
        };
        let entry = &mut self.providers[index].1;
        for &provider in implicit_providers {
            if !entry.contains(&provider) {
                entry.push(provider);
            }
        }
        if !entry.contains(&component) {
            entry.push(component);
        }

        let live: Vec<ComponentKey> = entry
            .iter()
            .copied()
            .filter(|&provider| {
                state.is_selected(provider)
                    || state.module(state.component(provider).module_key()).selected().is_none()
            })
            .collect();
        let mut modules: Vec<ModuleKey> = Vec::new();
        for &provider in &live {
            let module = state.component(provider).module_key();
            if !modules.contains(&module) {
                modules.push(module);
            }
        }
        if modules.len() < 2 {
            return PotentialConflict::none();
        }

        tracing::debug!("capability conflict on {key} between {} modules", modules.len());
        let already_queued = self
            .conflicts
            .iter()
            .any(|conflict| conflict.capability == key && conflict.components == live);
        if !already_queued {
            self.conflicts.push_back(CapabilityConflict {
                capability: key,
                components: live,
            });
        }
        PotentialConflict {
            participants: modules,
        }
    }

    /// Resolve one batched capability conflict.
    pub(crate) fn resolve_next(&mut self, state: &mut ResolveState) -> Result<(), ResolveFailure> {
        let Some(conflict) = self.conflicts.pop_front() else {
            return Ok(());
        };
        let winner = self
            .resolver
            .select(state, &conflict.components)?
            .ok_or_else(|| {
                ResolveFailure::new(
                    FailureKind::ConflictResolver,
                    format!("capability conflict on {} is unresolved", conflict.capability),
                )
            })?;
        tracing::debug!(
            "capability {} provided by {}",
            conflict.capability,
            state.component(winner).version_id()
        );
        let mut modules: Vec<ModuleKey> = Vec::new();
        for &component in &conflict.components {
            let module = state.component(component).module_key();
            if !modules.contains(&module) {
                modules.push(module);
            }
        }
        for module in winner_module_first(state, winner, modules) {
            state.replace_selection_with_conflict_result(module, winner);
        }
        Ok(())
    }
}
