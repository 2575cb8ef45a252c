//! Bounded execution of metadata prefetch work.
//!
//! Workers only talk to the metadata resolver; outcomes are handed back to
//! the single-threaded traversal loop, which applies them to the graph.

use std::sync::Arc;

use keel_core::metadata::ComponentMetadata;
use keel_core::module::ComponentId;
use keel_util::errors::{KeelError, KeelResult};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::resolvers::{MetadataResolver, ResolveFailure};
use crate::state::ComponentKey;

const MAX_CONCURRENT_FETCHES: usize = 8;

/// One unit of prefetch work.
pub struct MetadataFetch {
    pub(crate) component: ComponentKey,
    pub(crate) id: ComponentId,
    pub(crate) resolver: Arc<dyn MetadataResolver>,
}

impl MetadataFetch {
    pub fn run(self) -> FetchOutcome {
        let result = self.resolver.resolve(&self.id);
        FetchOutcome {
            component: self.component,
            result,
        }
    }
}

/// The result a worker hands back to the traversal loop.
pub struct FetchOutcome {
    pub(crate) component: ComponentKey,
    pub(crate) result: Result<Arc<ComponentMetadata>, ResolveFailure>,
}

/// Executes a batch of fetches and returns every outcome.
///
/// A failed fetch is still an outcome; only an executor-level error (a dead
/// worker, caller cancellation) aborts the resolution.
pub trait WorkQueue {
    fn run_all(&self, work: Vec<MetadataFetch>) -> KeelResult<Vec<FetchOutcome>>;
}

/// Runs fetches one after another on the calling thread. Deterministic;
/// used by tests and single-threaded embedders.
#[derive(Default)]
pub struct InlineWorkQueue;

impl WorkQueue for InlineWorkQueue {
    fn run_all(&self, work: Vec<MetadataFetch>) -> KeelResult<Vec<FetchOutcome>> {
        Ok(work.into_iter().map(MetadataFetch::run).collect())
    }
}

/// Fans fetches out over a tokio runtime, bounded by a semaphore.
pub struct TokioWorkQueue {
    runtime: tokio::runtime::Runtime,
    max_concurrent: usize,
}

impl TokioWorkQueue {
    pub fn new() -> KeelResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .build()
            .map_err(|e| KeelError::Generic {
                message: format!("failed to start prefetch runtime: {e}"),
            })?;
        Ok(Self {
            runtime,
            max_concurrent: MAX_CONCURRENT_FETCHES,
        })
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }
}

impl WorkQueue for TokioWorkQueue {
    fn run_all(&self, work: Vec<MetadataFetch>) -> KeelResult<Vec<FetchOutcome>> {
        self.runtime.block_on(async {
            let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
            let mut join_set = JoinSet::new();
            for fetch in work {
                let semaphore = Arc::clone(&semaphore);
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    tokio::task::spawn_blocking(move || fetch.run()).await
                });
            }
            let mut outcomes = Vec::new();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(Ok(outcome)) => outcomes.push(outcome),
                    Ok(Err(e)) | Err(e) => {
                        join_set.abort_all();
                        return Err(KeelError::Metadata {
                            message: format!("metadata prefetch worker failed: {e}"),
                        }
                        .into());
                    }
                }
            }
            Ok(outcomes)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::module::ModuleVersionId;

    struct StubResolver;

    impl MetadataResolver for StubResolver {
        fn is_fetching_cheap(&self, _id: &ComponentId) -> bool {
            false
        }

        fn resolve(&self, id: &ComponentId) -> Result<Arc<ComponentMetadata>, ResolveFailure> {
            let version_id = ModuleVersionId::parse(id.as_str()).ok_or_else(|| {
                ResolveFailure::new(
                    crate::resolvers::FailureKind::MetadataResolve,
                    format!("unknown component {id}"),
                )
            })?;
            Ok(Arc::new(ComponentMetadata::new(version_id)))
        }
    }

    fn fetch(index: usize, id: &str) -> MetadataFetch {
        MetadataFetch {
            component: ComponentKey(index),
            id: ComponentId::new(id),
            resolver: Arc::new(StubResolver),
        }
    }

    #[test]
    fn inline_queue_preserves_order() {
        let work = vec![fetch(0, "g:a:1.0"), fetch(1, "g:b:2.0")];
        let outcomes = InlineWorkQueue.run_all(work).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].component, ComponentKey(0));
        assert_eq!(outcomes[1].component, ComponentKey(1));
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
    }

    #[test]
    fn inline_queue_reports_fetch_failures_as_outcomes() {
        let outcomes = InlineWorkQueue.run_all(vec![fetch(0, "not-a-coordinate")]).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_err());
    }

    #[test]
    fn tokio_queue_returns_every_outcome() {
        let queue = TokioWorkQueue::new().unwrap().with_max_concurrent(2);
        let work = (0..6)
            .map(|i| fetch(i, &format!("g:lib{i}:1.{i}")))
            .collect();
        let outcomes = queue.run_all(work).unwrap();
        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
    }
}
