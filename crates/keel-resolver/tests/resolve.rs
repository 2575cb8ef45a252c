//! End-to-end resolution scenarios against an in-memory repository.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use keel_core::dependency::DependencySpec;
use keel_core::metadata::{Capability, ComponentMetadata};
use keel_core::module::{ComponentId, ModuleId, ModuleVersionId};
use keel_core::selector::{VersionConstraint, VersionSelector};
use keel_core::version::ModuleVersion;
use keel_resolver::builder::GraphBuilder;
use keel_resolver::graph::{GraphCollector, ResolutionReport};
use keel_resolver::queue::TokioWorkQueue;
use keel_resolver::resolvers::{
    ComponentResolveResult, ContextResolver, FailureKind, IdResolveResult, IdResolver,
    MetadataResolver, ModuleReplacements, ResolveContext, ResolveFailure,
};
use keel_resolver::state::{NodeKey, ResolveState, SelectorKey};
use keel_resolver::visit::GraphVisitor;

fn coord(s: &str) -> ModuleVersionId {
    ModuleVersionId::parse(s).unwrap()
}

fn module(s: &str) -> ModuleId {
    ModuleId::parse(s).unwrap()
}

fn dep(target: &str, version: &str) -> DependencySpec {
    DependencySpec::new(module(target), VersionConstraint::require(version))
}

fn component(coordinate: &str) -> ComponentMetadata {
    ComponentMetadata::new(coord(coordinate))
}

/// In-memory component universe shared by the id and metadata resolvers.
struct Repository {
    components: HashMap<ModuleId, Vec<Arc<ComponentMetadata>>>,
    /// When set, id resolution leaves metadata behind so the engine has to
    /// go through the metadata resolver.
    lazy_metadata: bool,
    id_log: Mutex<Vec<ModuleId>>,
    metadata_log: Mutex<Vec<String>>,
}

impl Repository {
    fn new() -> Self {
        Self {
            components: HashMap::new(),
            lazy_metadata: false,
            id_log: Mutex::new(Vec::new()),
            metadata_log: Mutex::new(Vec::new()),
        }
    }

    fn lazy() -> Self {
        let mut repo = Self::new();
        repo.lazy_metadata = true;
        repo
    }

    fn add(&mut self, metadata: ComponentMetadata) {
        self.components
            .entry(metadata.id.module_id())
            .or_default()
            .push(Arc::new(metadata));
    }

    fn id_resolutions_for(&self, target: &ModuleId) -> usize {
        self.id_log
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == target)
            .count()
    }

    fn metadata_resolutions_for(&self, coordinate: &str) -> usize {
        self.metadata_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == coordinate)
            .count()
    }

    /// Highest version the preferred selector accepts.
    fn find(&self, target: &ModuleId, constraint: &VersionConstraint) -> Option<Arc<ComponentMetadata>> {
        let versions = self.components.get(target)?;
        let mut best: Option<(&Arc<ComponentMetadata>, ModuleVersion)> = None;
        for metadata in versions {
            let version = ModuleVersion::parse(&metadata.id.version);
            let accepted = match &constraint.preferred {
                Some(VersionSelector::Latest) | None => true,
                Some(selector) => selector.accepts(&version),
            };
            if !accepted {
                continue;
            }
            match &best {
                Some((_, current)) if version <= *current => {}
                _ => best = Some((metadata, version)),
            }
        }
        best.map(|(metadata, _)| Arc::clone(metadata))
    }
}

impl IdResolver for Repository {
    fn resolve(&self, target: &ModuleId, constraint: &VersionConstraint) -> IdResolveResult {
        self.id_log.lock().unwrap().push(target.clone());
        match self.find(target, constraint) {
            Some(metadata) => IdResolveResult::resolved(
                ComponentId::from(&metadata.id),
                metadata.id.clone(),
                if self.lazy_metadata {
                    None
                } else {
                    Some(metadata)
                },
            ),
            None => IdResolveResult::failed(ResolveFailure::new(
                FailureKind::IdResolve,
                format!("no version of {target} satisfies {constraint}"),
            )),
        }
    }
}

impl MetadataResolver for Repository {
    fn is_fetching_cheap(&self, _id: &ComponentId) -> bool {
        !self.lazy_metadata
    }

    fn resolve(&self, id: &ComponentId) -> Result<Arc<ComponentMetadata>, ResolveFailure> {
        self.metadata_log.lock().unwrap().push(id.to_string());
        let version_id = ModuleVersionId::parse(id.as_str()).ok_or_else(|| {
            ResolveFailure::new(FailureKind::MetadataResolve, format!("bad id {id}"))
        })?;
        self.components
            .get(&version_id.module_id())
            .and_then(|versions| {
                versions
                    .iter()
                    .find(|m| m.id == version_id)
                    .map(Arc::clone)
            })
            .ok_or_else(|| {
                ResolveFailure::new(
                    FailureKind::MetadataResolve,
                    format!("no metadata for {id}"),
                )
            })
    }
}

struct RootProvider {
    metadata: Arc<ComponentMetadata>,
}

impl ContextResolver for RootProvider {
    fn resolve(&self, _context: &ResolveContext) -> Result<ComponentResolveResult, ResolveFailure> {
        Ok(ComponentResolveResult {
            id: ComponentId::from(&self.metadata.id),
            version_id: self.metadata.id.clone(),
            metadata: Arc::clone(&self.metadata),
        })
    }
}

/// Visitor recording the exact callback sequence, the final per-module
/// selections, and the assembled report.
#[derive(Default)]
struct RecordingVisitor {
    events: Vec<String>,
    selections: HashMap<String, String>,
    resolved_sets: HashMap<String, Vec<String>>,
    collector: GraphCollector,
}

impl RecordingVisitor {
    fn into_report(self) -> ResolutionReport {
        self.collector.into_report()
    }

    fn event_index(&self, event: &str) -> usize {
        self.events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event {event:?} not found in {:#?}", self.events))
    }
}

impl GraphVisitor for RecordingVisitor {
    fn start(&mut self, state: &ResolveState, root: NodeKey) {
        let id = state.component(state.node(root).component_key()).version_id();
        self.events.push(format!("start {id}"));
        self.collector.start(state, root);
    }

    fn visit_selector(&mut self, state: &ResolveState, selector: SelectorKey) {
        let requested = state.selector(selector).requested();
        self.events.push(format!(
            "selector {} {}",
            requested.target, requested.constraint
        ));
        self.collector.visit_selector(state, selector);
    }

    fn visit_node(&mut self, state: &ResolveState, node: NodeKey) {
        let id = state.component(state.node(node).component_key()).version_id();
        self.events.push(format!("node {id}"));
        self.collector.visit_node(state, node);
    }

    fn visit_edges(&mut self, state: &ResolveState, node: NodeKey) {
        let to = state
            .component(state.node(node).component_key())
            .version_id()
            .clone();
        self.events.push(format!("edges {to}"));
        for &edge in state.node(node).incoming_edges() {
            let from = state
                .component(state.node(state.edge(edge).from_node()).component_key())
                .version_id();
            self.events.push(format!("edge {from} -> {to}"));
        }
        self.collector.visit_edges(state, node);
    }

    fn finish(&mut self, state: &ResolveState, root: NodeKey) {
        for module in state.modules() {
            if let Some(selected) = module.selected() {
                self.selections.insert(
                    module.id().to_string(),
                    state.component(selected).version().to_string(),
                );
            }
            if let Ok(components) = state.resolved_components(module.key()) {
                self.resolved_sets.insert(
                    module.id().to_string(),
                    components
                        .into_iter()
                        .map(|c| state.component(c).version().to_string())
                        .collect(),
                );
            }
        }
        self.events.push("finish".to_string());
        self.collector.finish(state, root);
    }
}

fn builder_for(repo: Repository, root: ComponentMetadata) -> GraphBuilder {
    let repo = Arc::new(repo);
    GraphBuilder::new(
        repo.clone(),
        repo,
        Arc::new(RootProvider {
            metadata: Arc::new(root),
        }),
    )
}

fn resolve_ok(builder: &GraphBuilder) -> RecordingVisitor {
    let mut visitor = RecordingVisitor::default();
    builder
        .resolve(&ResolveContext::new("compile"), &mut visitor)
        .unwrap();
    visitor
}

#[test]
fn simple_transitive_chain() {
    let mut repo = Repository::new();
    repo.add(component("test:a:1.0").with_dependency(dep("test:b", "1.0")));
    repo.add(component("test:b:1.0"));
    let root = component("test:root:1.0").with_dependency(dep("test:a", "1.0"));

    let visitor = resolve_ok(&builder_for(repo, root));

    assert_eq!(visitor.selections["test:a"], "1.0");
    assert_eq!(visitor.selections["test:b"], "1.0");
    // Consumers are visited first, so the root's edge is emitted before the
    // deeper one.
    let root_edge = visitor.event_index("edge test:root:1.0 -> test:a:1.0");
    let deep_edge = visitor.event_index("edge test:a:1.0 -> test:b:1.0");
    assert!(root_edge < deep_edge);

    let report = visitor.into_report();
    assert!(report.failures.is_empty());
    assert_eq!(report.graph.len(), 2);
    let tree = report.graph.print_tree(None);
    assert!(tree.contains("test:a:1.0"));
    assert!(tree.contains("test:b:1.0"));
}

#[test]
fn conflict_highest_version_wins_and_restarts() {
    let mut repo = Repository::new();
    repo.add(component("test:a:1.0").with_dependency(dep("test:b", "1.0")));
    repo.add(component("test:c:1.0").with_dependency(dep("test:b", "2.0")));
    repo.add(component("test:b:1.0"));
    repo.add(component("test:b:2.0"));
    let root = component("test:root:1.0")
        .with_dependency(dep("test:a", "1.0"))
        .with_dependency(dep("test:c", "1.0"));

    let visitor = resolve_ok(&builder_for(repo, root));

    assert_eq!(visitor.selections["test:b"], "2.0");
    // After the restart, a's edge points at the winner.
    visitor.event_index("edge test:a:1.0 -> test:b:2.0");
    assert!(!visitor
        .events
        .iter()
        .any(|e| e.contains("-> test:b:1.0")));
}

#[test]
fn forced_selector_collapses_the_module() {
    let mut repo = Repository::new();
    repo.add(component("test:b:1.0"));
    repo.add(component("test:b:2.0"));
    repo.add(component("test:c:1.0").with_dependency(dep("test:b", "2.0")));
    let forced = DependencySpec::new(module("test:b"), VersionConstraint::require("1.0").forced());
    let root = component("test:root:1.0")
        .with_dependency(forced)
        .with_dependency(dep("test:c", "1.0"));

    let visitor = resolve_ok(&builder_for(repo, root));

    assert_eq!(visitor.selections["test:b"], "1.0");
    // The resolved set of the module collapses to the forced version.
    assert_eq!(visitor.resolved_sets["test:b"], vec!["1.0".to_string()]);
}

#[test]
fn rejected_selection_fails_validation() {
    let mut repo = Repository::new();
    repo.add(component("test:a:1.5"));
    let rejecting = DependencySpec::new(
        module("test:a"),
        VersionConstraint::require("[1.0,)").reject("1.5"),
    );
    let root = component("test:root:1.0").with_dependency(rejecting);

    let mut visitor = RecordingVisitor::default();
    let err = builder_for(repo, root)
        .resolve(&ResolveContext::new("compile"), &mut visitor)
        .unwrap_err();
    let message = format!("{err}");
    assert!(message.contains("Rejected selection"), "got: {message}");
    assert!(message.contains("test:a"), "got: {message}");
}

#[test]
fn strict_constraint_rejects_conflict_winner() {
    let mut repo = Repository::new();
    repo.add(component("test:a:1.0"));
    repo.add(component("test:a:2.0"));
    repo.add(component("test:b:1.0").with_dependency(dep("test:a", "2.0")));
    let strict = DependencySpec::new(module("test:a"), VersionConstraint::require("1.0").strictly());
    let root = component("test:root:1.0")
        .with_dependency(strict)
        .with_dependency(dep("test:b", "1.0"));

    let mut visitor = RecordingVisitor::default();
    let err = builder_for(repo, root)
        .resolve(&ResolveContext::new("compile"), &mut visitor)
        .unwrap_err();
    assert!(format!("{err}").contains("Rejected selection"));
}

#[test]
fn compatible_selector_reuses_existing_resolution() {
    let mut repo = Repository::new();
    repo.add(component("test:d:1.0"));
    repo.add(component("test:e:1.0").with_dependency(dep("test:d", "[1.0,)")));
    let root = component("test:root:1.0")
        .with_dependency(dep("test:d", "1.0"))
        .with_dependency(dep("test:e", "1.0"));

    let repo = Arc::new(repo);
    let builder = GraphBuilder::new(
        repo.clone(),
        repo.clone(),
        Arc::new(RootProvider {
            metadata: Arc::new(root),
        }),
    );
    let visitor = resolve_ok(&builder);

    assert_eq!(visitor.selections["test:d"], "1.0");
    // The range selector reused d's pick instead of resolving again.
    assert_eq!(repo.id_resolutions_for(&module("test:d")), 1);
}

#[test]
fn dependency_cycle_terminates() {
    let mut repo = Repository::new();
    repo.add(component("test:a:1.0").with_dependency(dep("test:b", "1.0")));
    repo.add(component("test:b:1.0").with_dependency(dep("test:a", "1.0")));
    let root = component("test:root:1.0").with_dependency(dep("test:a", "1.0"));

    let visitor = resolve_ok(&builder_for(repo, root));

    for label in ["test:root:1.0", "test:a:1.0", "test:b:1.0"] {
        let nodes = visitor
            .events
            .iter()
            .filter(|e| *e == &format!("node {label}"))
            .count();
        let edges = visitor
            .events
            .iter()
            .filter(|e| *e == &format!("edges {label}"))
            .count();
        assert_eq!(nodes, 1, "{label} visited {nodes} times");
        assert_eq!(edges, 1, "{label} edges visited {edges} times");
    }
    // The back edge survives into the result.
    visitor.event_index("edge test:b:1.0 -> test:a:1.0");
}

#[test]
fn module_replacement_redirects_consumers() {
    let mut repo = Repository::new();
    repo.add(component("test:liba:1.0"));
    repo.add(component("test:libb:2.0"));
    let root = component("test:root:1.0")
        .with_dependency(dep("test:liba", "1.0"))
        .with_dependency(dep("test:libb", "2.0"));

    let mut replacements = ModuleReplacements::new();
    replacements.add(module("test:liba"), module("test:libb"));
    let builder = builder_for(repo, root).with_replacements(replacements);
    let visitor = resolve_ok(&builder);

    assert_eq!(visitor.selections["test:liba"], "2.0");
    assert_eq!(visitor.selections["test:libb"], "2.0");
    let report = visitor.into_report();
    assert_eq!(report.graph.len(), 1);
    assert!(report.graph.find("test:libb").is_some());
    assert!(report.graph.find("test:liba").is_none());
}

#[test]
fn capability_conflict_keeps_highest_provider() {
    let mut repo = Repository::new();
    repo.add(
        component("test:json-old:1.0").with_capability(Capability::new("cap", "json", "1.0")),
    );
    repo.add(
        component("test:json-new:2.0").with_capability(Capability::new("cap", "json", "1.0")),
    );
    let root = component("test:root:1.0")
        .with_dependency(dep("test:json-old", "1.0"))
        .with_dependency(dep("test:json-new", "2.0"));

    let visitor = resolve_ok(&builder_for(repo, root));

    assert_eq!(visitor.selections["test:json-old"], "2.0");
    assert_eq!(visitor.selections["test:json-new"], "2.0");
    let report = visitor.into_report();
    assert_eq!(report.graph.len(), 1);
    assert!(report.graph.find("test:json-new").is_some());
}

#[test]
fn capability_matching_module_identity_seeds_providers() {
    let mut repo = Repository::new();
    repo.add(component("test:json-old:1.0"));
    repo.add(
        component("test:alt:2.0").with_capability(Capability::new("test", "json-old", "1.0")),
    );
    let root = component("test:root:1.0")
        .with_dependency(dep("test:json-old", "1.0"))
        .with_dependency(dep("test:alt", "2.0"));

    let visitor = resolve_ok(&builder_for(repo, root));

    assert_eq!(visitor.selections["test:alt"], "2.0");
    assert_eq!(visitor.selections["test:json-old"], "2.0");
}

#[test]
fn agreed_candidate_replaces_current_without_conflict_resolution() {
    let mut repo = Repository::new();
    repo.add(component("test:x:1.0"));
    repo.add(component("test:x:2.0"));
    repo.add(component("test:y:1.0").with_dependency(dep("test:x", "1.0")));
    let root = component("test:root:1.0")
        .with_dependency(dep("test:x", "[1.0,)"))
        .with_dependency(dep("test:y", "1.0"));

    let repo = Arc::new(repo);
    let builder = GraphBuilder::new(
        repo.clone(),
        repo.clone(),
        Arc::new(RootProvider {
            metadata: Arc::new(root),
        }),
    );
    let visitor = resolve_ok(&builder);

    // The root's range admits 1.0, so the exact selector's candidate wins
    // without consulting the conflict resolver, displacing the initial 2.0.
    assert_eq!(visitor.selections["test:x"], "1.0");
    assert_eq!(repo.id_resolutions_for(&module("test:x")), 2);
    visitor.event_index("edge test:root:1.0 -> test:x:1.0");
}

#[test]
fn optional_dependency_stays_out_without_hard_edge() {
    let mut repo = Repository::new();
    repo.add(component("test:a:1.0").with_dependency(dep("test:b", "1.0").optional()));
    repo.add(component("test:b:1.0"));
    let root = component("test:root:1.0").with_dependency(dep("test:a", "1.0"));

    let visitor = resolve_ok(&builder_for(repo, root));

    assert!(!visitor.selections.contains_key("test:b"));
    assert_eq!(visitor.into_report().graph.len(), 1);
}

#[test]
fn optional_dependency_materializes_once_module_is_hard() {
    let mut repo = Repository::new();
    repo.add(component("test:a:1.0").with_dependency(dep("test:b", "[1.0,)").optional()));
    repo.add(component("test:b:1.0"));
    repo.add(component("test:c:1.0").with_dependency(dep("test:b", "1.0")));
    let root = component("test:root:1.0")
        .with_dependency(dep("test:a", "1.0"))
        .with_dependency(dep("test:c", "1.0"));

    let visitor = resolve_ok(&builder_for(repo, root));

    assert_eq!(visitor.selections["test:b"], "1.0");
    visitor.event_index("edge test:a:1.0 -> test:b:1.0");
    visitor.event_index("edge test:c:1.0 -> test:b:1.0");
}

#[test]
fn id_failure_is_recorded_and_resolution_continues() {
    let mut repo = Repository::new();
    repo.add(component("test:good:1.0"));
    let root = component("test:root:1.0")
        .with_dependency(dep("test:missing", "1.0"))
        .with_dependency(dep("test:good", "1.0"));

    let visitor = resolve_ok(&builder_for(repo, root));

    assert_eq!(visitor.selections["test:good"], "1.0");
    assert!(!visitor.selections.contains_key("test:missing"));
    let report = visitor.into_report();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::IdResolve);
    assert!(report.failures[0].message.contains("test:missing"));
}

#[test]
fn parallel_prefetch_fetches_each_component_once() {
    let mut repo = Repository::lazy();
    repo.add(component("test:a:1.0").with_dependency(dep("test:c", "1.0")));
    repo.add(component("test:b:1.0"));
    repo.add(component("test:c:1.0"));
    let root = component("test:root:1.0")
        .with_dependency(dep("test:a", "1.0"))
        .with_dependency(dep("test:b", "1.0"));

    let repo = Arc::new(repo);
    let builder = GraphBuilder::new(
        repo.clone(),
        repo.clone(),
        Arc::new(RootProvider {
            metadata: Arc::new(root),
        }),
    )
    .with_work_queue(Arc::new(TokioWorkQueue::new().unwrap()));
    let visitor = resolve_ok(&builder);

    assert_eq!(visitor.selections["test:a"], "1.0");
    assert_eq!(visitor.selections["test:b"], "1.0");
    assert_eq!(visitor.selections["test:c"], "1.0");
    for coordinate in ["test:a:1.0", "test:b:1.0", "test:c:1.0"] {
        assert_eq!(repo.metadata_resolutions_for(coordinate), 1, "{coordinate}");
    }
}

#[test]
fn resolution_is_deterministic() {
    fn run() -> Vec<String> {
        let mut repo = Repository::new();
        repo.add(component("test:a:1.0").with_dependency(dep("test:b", "1.0")));
        repo.add(component("test:c:1.0").with_dependency(dep("test:b", "2.0")));
        repo.add(component("test:b:1.0"));
        repo.add(component("test:b:2.0"));
        let root = component("test:root:1.0")
            .with_dependency(dep("test:a", "1.0"))
            .with_dependency(dep("test:c", "1.0"));
        resolve_ok(&builder_for(repo, root)).events
    }

    assert_eq!(run(), run());
}

#[test]
fn start_and_finish_bracket_the_visit() {
    let mut repo = Repository::new();
    repo.add(component("test:a:1.0"));
    let root = component("test:root:1.0").with_dependency(dep("test:a", "1.0"));

    let visitor = resolve_ok(&builder_for(repo, root));

    assert_eq!(visitor.events.first().unwrap(), "start test:root:1.0");
    assert_eq!(visitor.events.last().unwrap(), "finish");
    assert_eq!(
        visitor.events.iter().filter(|e| *e == "finish").count(),
        1
    );
    // Selectors are visited before any node.
    let selector = visitor.event_index("selector test:a 1.0");
    let node = visitor.event_index("node test:a:1.0");
    assert!(selector < node);
}
