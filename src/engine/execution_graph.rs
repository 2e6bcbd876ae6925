// src/engine/execution_graph.rs

//! Facade tying a plan, its listeners and a worker pool together.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::dag::{ExecutionPlan, GraphState, NodeFilter, NodeId, NodeOutcome, WorkNode, WorkSource};
use crate::engine::coordinator::{RunReport, WorkerCoordinator};
use crate::engine::listeners::{GraphListener, ListenerBroadcaster, ListenerId, NodeListener};
use crate::errors::{Result, RundagError};
use crate::exec::ExecutorChain;

/// Build-tool facing entry point: add work, configure, listen, execute.
///
/// After [`ExecutionGraph::execute`] returns, the plan is cleared and the
/// graph can be reused for another round of work.
#[derive(Debug)]
pub struct ExecutionGraph {
    plan: Arc<ExecutionPlan>,
    listeners: Arc<ListenerBroadcaster>,
    chain: Arc<ExecutorChain>,
    coordinator: WorkerCoordinator,
}

impl ExecutionGraph {
    pub fn new(chain: ExecutorChain, worker_count: usize) -> Result<Self> {
        Ok(Self {
            plan: Arc::new(ExecutionPlan::new()),
            listeners: Arc::new(ListenerBroadcaster::new()),
            chain: Arc::new(chain),
            coordinator: WorkerCoordinator::new(worker_count)?,
        })
    }

    pub fn plan(&self) -> &Arc<ExecutionPlan> {
        &self.plan
    }

    pub fn listeners(&self) -> &Arc<ListenerBroadcaster> {
        &self.listeners
    }

    pub fn worker_count(&self) -> usize {
        self.coordinator.worker_count()
    }

    // ----- configuration ---------------------------------------------------

    /// Add `requested` and everything they depend on.
    pub fn add_units(&self, source: &dyn WorkSource, requested: &[NodeId]) -> Result<()> {
        let started = Instant::now();
        self.plan.add_to_plan(source, requested)?;
        debug!(
            requested = requested.len(),
            total = self.plan.size(),
            elapsed = ?started.elapsed(),
            "added work units to the execution graph"
        );
        Ok(())
    }

    pub fn use_filter(&self, filter: Option<NodeFilter>) -> Result<()> {
        self.plan.use_filter(filter)
    }

    pub fn set_continue_on_failure(&self, continue_on_failure: bool) -> Result<()> {
        self.plan.set_continue_on_failure(continue_on_failure)
    }

    /// Determine the plan now. Graph listeners are notified by
    /// [`ExecutionGraph::execute`].
    pub fn populate(&self) -> Result<()> {
        self.plan.populate()
    }

    // ----- execution -------------------------------------------------------

    /// Execute every added node and clear the plan afterwards.
    pub async fn execute(&self) -> Result<RunReport> {
        let result = self
            .coordinator
            .run(
                Arc::clone(&self.plan),
                Arc::clone(&self.chain),
                Arc::clone(&self.listeners),
            )
            .await;

        match (result, self.plan.clear()) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(clear_err)) => {
                warn!(error = %clear_err, "could not clear the execution plan after a failed run");
                Err(err)
            }
        }
    }

    /// Cooperatively cancel a running [`ExecutionGraph::execute`].
    pub fn cancel(&self) {
        self.plan.cancel();
    }

    // ----- queries ---------------------------------------------------------

    pub fn has_node(&self, id: &str) -> Result<bool> {
        self.plan.contains(id)
    }

    /// Whether any node has the given display name.
    pub fn has_node_named(&self, name: &str) -> Result<bool> {
        Ok(self
            .plan
            .all_nodes()?
            .iter()
            .any(|node| node.display_name() == name))
    }

    /// Every node, in execution order.
    pub fn all_nodes(&self) -> Result<Vec<WorkNode>> {
        self.plan.all_nodes()
    }

    pub fn dependencies_of(&self, id: &str) -> Result<Vec<NodeId>> {
        if !self.plan.contains(id)? {
            return Err(RundagError::UnknownNode(NodeId::new(id)));
        }
        self.plan.dependencies_of(id)
    }

    pub fn requested_nodes(&self) -> Vec<NodeId> {
        self.plan.requested_nodes()
    }

    pub fn filtered_nodes(&self) -> Result<BTreeSet<NodeId>> {
        self.plan.filtered_nodes()
    }

    pub fn size(&self) -> usize {
        self.plan.size()
    }

    pub fn graph_state(&self) -> GraphState {
        self.plan.graph_state()
    }

    // ----- listeners -------------------------------------------------------

    pub fn add_graph_listener(&self, listener: Arc<dyn GraphListener>) -> ListenerId {
        self.listeners.add_graph_listener(listener)
    }

    pub fn add_node_listener(&self, listener: Arc<dyn NodeListener>) -> ListenerId {
        self.listeners.add_node_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove_listener(id)
    }

    pub fn when_ready<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&ExecutionPlan) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners.when_ready(f)
    }

    pub fn before_node<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&WorkNode) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners.before_node(f)
    }

    pub fn after_node<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&WorkNode, &NodeOutcome) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners.after_node(f)
    }
}
