// src/exec/backend.rs

//! Pluggable executor abstraction.
//!
//! Workers never run work themselves; they hand each claimed node to an
//! [`ExecutorChain`]. The first executor in the chain that accepts the node
//! runs it. Tests can put their own executor at the front of the chain to
//! simulate work without spawning anything.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::dag::{NodeOutcome, WorkNode};
use crate::errors::{Result, RundagError};
use crate::exec::cache::BuildCacheController;

/// Future returned by [`NodeExecutor::execute`].
pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<NodeOutcome>> + Send + 'a>>;

/// Something able to execute certain kinds of work nodes.
///
/// `Ok(NodeOutcome::Failed(..))` means the node's own work failed and is
/// recorded against the node. `Err(..)` is reserved for infrastructure
/// problems and aborts the whole run.
pub trait NodeExecutor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn accepts(&self, node: &WorkNode) -> bool;

    fn execute<'a>(&'a self, node: &'a WorkNode) -> ExecFuture<'a>;
}

/// Prioritised list of executors, optionally fronted by a build cache.
#[derive(Default, Clone)]
pub struct ExecutorChain {
    executors: Vec<Arc<dyn NodeExecutor>>,
    cache: Option<BuildCacheController>,
}

impl fmt::Debug for ExecutorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.executors.iter().map(|e| e.name()).collect();
        f.debug_struct("ExecutorChain")
            .field("executors", &names)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl ExecutorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an executor. Earlier executors take priority.
    pub fn with<E: NodeExecutor + 'static>(mut self, executor: E) -> Self {
        self.executors.push(Arc::new(executor));
        self
    }

    pub fn push(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors.push(executor);
    }

    /// Consult `cache` before running nodes that declare a cache key.
    pub fn with_cache(mut self, cache: BuildCacheController) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// The executor that would run `node`.
    pub fn executor_for(&self, node: &WorkNode) -> Option<&Arc<dyn NodeExecutor>> {
        self.executors.iter().find(|e| e.accepts(node))
    }

    /// Run `node` through the first accepting executor.
    pub async fn execute(&self, node: &WorkNode) -> Result<NodeOutcome> {
        let executor = self
            .executor_for(node)
            .ok_or_else(|| RundagError::UnknownWorkType {
                node: node.id().clone(),
            })?;

        if let Some(cache) = &self.cache {
            if cache.try_load(node) {
                return Ok(NodeOutcome::UpToDate);
            }
        }

        debug!(
            node = %node.id(),
            executor = executor.name(),
            kind = node.work().kind(),
            "dispatching node to executor"
        );
        let outcome = executor.execute(node).await?;

        if let Some(cache) = &self.cache {
            if matches!(outcome, NodeOutcome::Completed) {
                cache.store(node);
            }
        }

        Ok(outcome)
    }
}
