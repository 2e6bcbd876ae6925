// src/dag/plan.rs

//! The execution plan: per-node scheduling state behind one critical section.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::dag::builder::GraphBuilder;
use crate::dag::graph::DagGraph;
use crate::dag::locks::ResourceLockTable;
use crate::dag::node::{NodeFailure, NodeId, NodeOutcome, NodeState, SkipReason, WorkNode};
use crate::dag::registry::NodeRegistry;
use crate::dag::source::WorkSource;
use crate::errors::{Result, RundagError};

/// Predicate deciding which nodes take part in a run. Nodes it rejects are
/// skipped without running.
pub type NodeFilter = Arc<dyn Fn(&WorkNode) -> bool + Send + Sync>;

/// Plan-level lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// Nothing added yet (or cleared).
    Empty,
    /// Work or configuration changed since the plan was last determined.
    Dirty,
    /// Node states reflect the current work and filter.
    Populated,
}

/// Result of asking the plan for work.
#[derive(Debug, Clone)]
pub enum Selection {
    /// A node was claimed for the caller; it is now `Executing`.
    Node(WorkNode),
    /// Nothing claimable right now, but work remains.
    NoneReady,
    /// No more nodes will be handed out.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Aborted,
    Cancelled,
}

impl Halt {
    fn skip_reason(self) -> SkipReason {
        match self {
            Halt::Aborted => SkipReason::Aborted,
            Halt::Cancelled => SkipReason::Cancelled,
        }
    }
}

#[derive(Debug)]
struct NodeEntry {
    node: WorkNode,
    state: NodeState,
    skip_reason: Option<SkipReason>,
    failure: Option<NodeFailure>,
}

impl NodeEntry {
    /// Terminal in a way that lets dependents proceed.
    fn satisfies_dependents(&self) -> bool {
        match self.state {
            NodeState::Completed => true,
            NodeState::Skipped => self
                .skip_reason
                .is_some_and(|reason| !reason.blocks_dependents()),
            _ => false,
        }
    }
}

struct PlanState {
    graph_state: GraphState,
    registry: NodeRegistry,
    graph: Option<DagGraph>,
    entries: HashMap<NodeId, NodeEntry>,
    /// Queued nodes keyed by execution-order position.
    ready: BTreeMap<usize, NodeId>,
    /// Nodes not yet terminal.
    remaining: usize,
    executing: usize,
    filter: Option<NodeFilter>,
    continue_on_failure: bool,
    scheduling_started: bool,
    halt: Option<Halt>,
    locks: ResourceLockTable,
    failures: Vec<NodeFailure>,
    requested: Vec<NodeId>,
    filtered: BTreeSet<NodeId>,
    population: u64,
}

/// Scheduling state machine shared by every worker of a run.
///
/// All reads and writes of node state happen under a single mutex, which is
/// never held while a node executes. Workers waiting for work park on a
/// [`Notify`] that is signalled whenever a node finishes or the run halts.
pub struct ExecutionPlan {
    state: Mutex<PlanState>,
    wake: Notify,
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("ExecutionPlan")
            .field("graph_state", &st.graph_state)
            .field("nodes", &st.registry.len())
            .field("remaining", &st.remaining)
            .field("executing", &st.executing)
            .field("continue_on_failure", &st.continue_on_failure)
            .field("failures", &st.failures.len())
            .finish_non_exhaustive()
    }
}

impl ExecutionPlan {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlanState {
                graph_state: GraphState::Empty,
                registry: NodeRegistry::new(),
                graph: None,
                entries: HashMap::new(),
                ready: BTreeMap::new(),
                remaining: 0,
                executing: 0,
                filter: None,
                continue_on_failure: false,
                scheduling_started: false,
                halt: None,
                locks: ResourceLockTable::new(),
                failures: Vec::new(),
                requested: Vec::new(),
                filtered: BTreeSet::new(),
                population: 0,
            }),
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ----- configuration ---------------------------------------------------

    /// Resolve `requested` (and their dependencies) from `source` into the plan.
    pub fn add_to_plan(&self, source: &dyn WorkSource, requested: &[NodeId]) -> Result<()> {
        let mut st = self.lock();
        st.ensure_not_started("add work")?;

        let roots = GraphBuilder::new(source).build(&mut st.registry, requested)?;
        for root in roots {
            if !st.requested.contains(&root) {
                st.requested.push(root);
            }
        }
        st.graph_state = GraphState::Dirty;
        Ok(())
    }

    /// Replace the node filter. `None` lets every node run.
    pub fn use_filter(&self, filter: Option<NodeFilter>) -> Result<()> {
        let mut st = self.lock();
        st.ensure_not_started("change the filter")?;
        st.filter = filter;
        if st.graph_state == GraphState::Populated {
            st.graph_state = GraphState::Dirty;
        }
        Ok(())
    }

    pub fn set_continue_on_failure(&self, continue_on_failure: bool) -> Result<()> {
        let mut st = self.lock();
        st.ensure_not_started("change the failure policy")?;
        st.continue_on_failure = continue_on_failure;
        Ok(())
    }

    pub fn continue_on_failure(&self) -> bool {
        self.lock().continue_on_failure
    }

    /// Determine node states if the plan is dirty.
    pub fn populate(&self) -> Result<()> {
        self.lock().ensure_populated()
    }

    pub fn graph_state(&self) -> GraphState {
        self.lock().graph_state
    }

    /// Number of times the plan went from dirty to populated.
    pub fn population(&self) -> u64 {
        self.lock().population
    }

    // ----- scheduling ------------------------------------------------------

    /// Claim the next runnable node, if any.
    ///
    /// Never blocks. See [`ExecutionPlan::next_node`] for the waiting variant.
    pub fn select_next(&self) -> Result<Selection> {
        let result = self.lock().select_next();
        if result.is_err() {
            self.wake.notify_waiters();
        }
        result
    }

    /// Wait until a node can be claimed (`Some`) or the plan is finished
    /// (`None`).
    pub async fn next_node(&self) -> Result<Option<WorkNode>> {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            // Register before looking at the state so a wake-up between the
            // check and the await is not lost.
            notified.as_mut().enable();

            match self.select_next()? {
                Selection::Node(node) => return Ok(Some(node)),
                Selection::Finished => return Ok(None),
                Selection::NoneReady => notified.await,
            }
        }
    }

    /// Record the outcome of an executing node and release its locks.
    pub fn node_finished(&self, id: &NodeId, outcome: NodeOutcome) -> Result<()> {
        let result = self.lock().node_finished(id, outcome);
        self.wake.notify_waiters();
        result
    }

    /// Stop handing out work after a fatal coordination error. Nodes already
    /// executing may still report back.
    pub fn abort(&self) {
        {
            let mut st = self.lock();
            if st.halt != Some(Halt::Aborted) {
                warn!("execution plan aborted");
                st.halt = Some(Halt::Aborted);
            }
        }
        self.wake.notify_waiters();
    }

    /// Fail every node still marked `Executing` and abort the plan.
    ///
    /// Only valid once no worker will report back any more, e.g. after a
    /// worker returned an error or panicked while holding a node. Releases
    /// the nodes' locks so the plan can be cleared. Returns the number of
    /// nodes abandoned.
    pub fn abandon_executing(&self, reason: &str) -> Result<usize> {
        let result = {
            let mut st = self.lock();
            st.halt = Some(Halt::Aborted);
            st.abandon_executing(reason)
        };
        self.wake.notify_waiters();
        result
    }

    /// Cooperatively cancel the run: no new node is claimed once observed.
    pub fn cancel(&self) {
        {
            let mut st = self.lock();
            if st.halt.is_none() {
                info!("execution plan cancelled");
                st.halt = Some(Halt::Cancelled);
            }
        }
        self.wake.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().halt == Some(Halt::Cancelled)
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().halt == Some(Halt::Aborted)
    }

    /// Whether every node reached a terminal state.
    pub fn is_finished(&self) -> bool {
        let st = self.lock();
        st.graph_state == GraphState::Populated && st.remaining == 0
    }

    /// Node failures in the order they happened. Empty means success.
    pub fn collect_failures(&self) -> Vec<NodeFailure> {
        self.lock().failures.clone()
    }

    /// Drop every node and return to [`GraphState::Empty`]. Filter and
    /// failure policy are kept.
    pub fn clear(&self) -> Result<()> {
        let mut st = self.lock();
        if st.executing > 0 {
            return Err(RundagError::IllegalState(format!(
                "cannot clear the execution plan while {} node(s) are executing",
                st.executing
            )));
        }
        st.registry.clear();
        st.graph = None;
        st.entries.clear();
        st.ready.clear();
        st.remaining = 0;
        st.scheduling_started = false;
        st.halt = None;
        st.locks.clear();
        st.failures.clear();
        st.requested.clear();
        st.filtered.clear();
        st.graph_state = GraphState::Empty;
        debug!("execution plan cleared");
        Ok(())
    }

    // ----- queries ---------------------------------------------------------

    pub fn state_of(&self, id: &str) -> Option<NodeState> {
        self.lock().entries.get(id).map(|e| e.state)
    }

    pub fn skip_reason_of(&self, id: &str) -> Option<SkipReason> {
        self.lock().entries.get(id).and_then(|e| e.skip_reason)
    }

    pub fn failure_of(&self, id: &str) -> Option<NodeFailure> {
        self.lock().entries.get(id).and_then(|e| e.failure.clone())
    }

    /// Snapshot of every node's state.
    pub fn states(&self) -> BTreeMap<NodeId, NodeState> {
        self.lock()
            .entries
            .iter()
            .map(|(id, e)| (id.clone(), e.state))
            .collect()
    }

    /// Number of nodes in the plan.
    pub fn size(&self) -> usize {
        self.lock().registry.len()
    }

    /// Every node in execution order.
    pub fn all_nodes(&self) -> Result<Vec<WorkNode>> {
        self.with_graph(|st, graph| {
            graph
                .execution_order()
                .iter()
                .filter_map(|id| st.registry.get(id).cloned())
                .collect()
        })
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        self.with_graph(|_, graph| graph.contains(id))
    }

    pub fn dependencies_of(&self, id: &str) -> Result<Vec<NodeId>> {
        self.with_graph(|_, graph| graph.dependencies_of(id))
    }

    pub fn dependents_of(&self, id: &str) -> Result<Vec<NodeId>> {
        self.with_graph(|_, graph| graph.dependents_of(id))
    }

    /// Every `(dependency, dependent)` edge, sorted.
    pub fn edges(&self) -> Result<Vec<(NodeId, NodeId)>> {
        self.with_graph(|_, graph| graph.edges())
    }

    /// Roots requested through [`ExecutionPlan::add_to_plan`], in request order.
    pub fn requested_nodes(&self) -> Vec<NodeId> {
        self.lock().requested.clone()
    }

    /// Nodes excluded by the filter.
    pub fn filtered_nodes(&self) -> Result<BTreeSet<NodeId>> {
        self.with_graph(|st, _| st.filtered.clone())
    }

    fn with_graph<T>(&self, f: impl FnOnce(&PlanState, &DagGraph) -> T) -> Result<T> {
        let mut st = self.lock();
        st.ensure_populated()?;
        let graph = st.graph.as_ref().ok_or_else(|| {
            RundagError::IllegalState("populated plan has no graph".to_string())
        })?;
        Ok(f(&st, graph))
    }
}

impl PlanState {
    fn ensure_not_started(&self, what: &str) -> Result<()> {
        if self.scheduling_started {
            return Err(RundagError::IllegalState(format!(
                "cannot {what} after scheduling has started"
            )));
        }
        Ok(())
    }

    fn ensure_populated(&mut self) -> Result<()> {
        match self.graph_state {
            GraphState::Empty => Err(RundagError::IllegalState(
                "work information is not available, as this execution plan has not been populated"
                    .to_string(),
            )),
            GraphState::Populated => Ok(()),
            GraphState::Dirty => {
                self.determine_execution_plan();
                self.graph_state = GraphState::Populated;
                self.population += 1;
                Ok(())
            }
        }
    }

    /// Compute the graph, apply the filter and queue every node whose
    /// dependencies are already satisfied.
    fn determine_execution_plan(&mut self) {
        let started = Instant::now();
        let graph = DagGraph::from_registry(&self.registry);
        let required = self.required_nodes(&graph);

        self.entries.clear();
        self.ready.clear();
        self.filtered.clear();
        self.remaining = 0;

        for id in graph.execution_order() {
            let Some(node) = self.registry.get(id) else {
                continue;
            };
            let (state, skip_reason) = if required.contains(id) {
                self.remaining += 1;
                (NodeState::Pending, None)
            } else {
                self.filtered.insert(id.clone());
                (NodeState::Skipped, Some(SkipReason::Filtered))
            };
            self.entries.insert(
                id.clone(),
                NodeEntry {
                    node: node.clone(),
                    state,
                    skip_reason,
                    failure: None,
                },
            );
        }

        for (pos, id) in graph.execution_order().iter().enumerate() {
            if self.is_pending_and_ready(&graph, id) {
                if let Some(entry) = self.entries.get_mut(id) {
                    entry.state = NodeState::Queued;
                    self.ready.insert(pos, id.clone());
                }
            }
        }

        debug!(
            nodes = graph.len(),
            filtered = self.filtered.len(),
            queued = self.ready.len(),
            elapsed = ?started.elapsed(),
            "determined execution plan"
        );

        self.graph = Some(graph);
    }

    /// Nodes reachable from the requested roots without passing through a
    /// node rejected by the filter.
    fn required_nodes(&self, graph: &DagGraph) -> HashSet<NodeId> {
        let Some(filter) = self.filter.as_ref() else {
            return graph.execution_order().iter().cloned().collect();
        };

        let accepts = |id: &NodeId| self.registry.get(id).is_some_and(|node| filter(node));

        let mut required = HashSet::new();
        let mut stack: Vec<NodeId> = self
            .requested
            .iter()
            .filter(|id| accepts(id))
            .cloned()
            .collect();

        while let Some(id) = stack.pop() {
            if !required.insert(id.clone()) {
                continue;
            }
            for dep in graph.dependencies_of(&id) {
                if !required.contains(&dep) && accepts(&dep) {
                    stack.push(dep);
                }
            }
        }
        required
    }

    fn is_pending_and_ready(&self, graph: &DagGraph, id: &NodeId) -> bool {
        let Some(entry) = self.entries.get(id) else {
            return false;
        };
        entry.state == NodeState::Pending
            && graph.dependencies_of(id).iter().all(|dep| {
                self.entries
                    .get(dep)
                    .is_some_and(NodeEntry::satisfies_dependents)
            })
    }

    fn transition(&mut self, id: &NodeId, to: NodeState) -> Result<()> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| RundagError::IllegalState(format!("unknown node '{id}'")))?;

        if !entry.state.can_transition_to(to) {
            return Err(RundagError::IllegalStateTransition {
                node: id.clone(),
                from: entry.state,
                to,
            });
        }

        entry.state = to;
        if to.is_terminal() {
            self.remaining = self.remaining.saturating_sub(1);
        }
        Ok(())
    }

    fn skip(&mut self, id: &NodeId, reason: SkipReason) -> Result<()> {
        self.transition(id, NodeState::Skipped)?;
        if let Some(entry) = self.entries.get_mut(id) {
            entry.skip_reason = Some(reason);
        }
        debug!(node = %id, %reason, "node skipped");
        Ok(())
    }

    fn select_next(&mut self) -> Result<Selection> {
        self.ensure_populated()?;
        self.scheduling_started = true;

        if let Some(halt) = self.halt {
            self.skip_unstarted(halt.skip_reason())?;
            return Ok(Selection::Finished);
        }

        if self.remaining == 0 {
            return Ok(Selection::Finished);
        }

        let claimable = self.ready.iter().find_map(|(&pos, id)| {
            let entry = self.entries.get(id)?;
            self.locks
                .all_free(entry.node.locks())
                .then(|| (pos, id.clone()))
        });

        if let Some((pos, id)) = claimable {
            self.ready.remove(&pos);
            let node = match self.entries.get(&id) {
                Some(entry) => entry.node.clone(),
                None => {
                    return Err(RundagError::IllegalState(format!(
                        "queued node '{id}' has no entry"
                    )));
                }
            };
            if !self.locks.try_acquire_all(&id, node.locks()) {
                return Err(RundagError::LockAcquisition(format!(
                    "locks of node '{id}' were free but could not be acquired"
                )));
            }
            self.transition(&id, NodeState::Executing)?;
            self.executing += 1;
            debug!(
                node = %id,
                locks = ?node.locks(),
                executing = self.executing,
                "node claimed for execution"
            );
            return Ok(Selection::Node(node));
        }

        if self.executing == 0 {
            // Nothing runs, so nothing will ever free a lock or finish a
            // dependency: the state is inconsistent.
            self.halt = Some(Halt::Aborted);
            let err = if self.ready.is_empty() {
                RundagError::IllegalState(format!(
                    "{} node(s) remain but none are queued or executing",
                    self.remaining
                ))
            } else {
                let blocked: Vec<String> = self
                    .ready
                    .values()
                    .filter_map(|id| self.entries.get(id))
                    .flat_map(|e| e.node.locks().iter().cloned())
                    .filter(|lock| self.locks.holder_of(lock).is_some())
                    .collect();
                RundagError::LockAcquisition(format!(
                    "{} queued node(s) are blocked on locks {:?} while nothing is executing",
                    self.ready.len(),
                    blocked
                ))
            };
            return Err(err);
        }

        Ok(Selection::NoneReady)
    }

    fn abandon_executing(&mut self, reason: &str) -> Result<usize> {
        let executing: Vec<WorkNode> = self
            .entries
            .values()
            .filter(|e| e.state == NodeState::Executing)
            .map(|e| e.node.clone())
            .collect();

        for node in &executing {
            let id = node.id();
            self.transition(id, NodeState::Failed)?;
            self.executing = self.executing.saturating_sub(1);
            self.locks.release_all(id, node.locks())?;

            let failure = NodeFailure::new(node, anyhow::anyhow!("execution abandoned: {reason}"));
            warn!(node = %id, reason, "abandoned executing node");
            if let Some(entry) = self.entries.get_mut(id) {
                entry.failure = Some(failure.clone());
            }
            self.failures.push(failure);
        }
        self.skip_unstarted(SkipReason::Aborted)?;
        Ok(executing.len())
    }

    fn skip_unstarted(&mut self, reason: SkipReason) -> Result<()> {
        let unstarted: Vec<NodeId> = self
            .entries
            .iter()
            .filter(|(_, e)| matches!(e.state, NodeState::Pending | NodeState::Queued))
            .map(|(id, _)| id.clone())
            .collect();

        for id in unstarted {
            self.skip(&id, reason)?;
        }
        self.ready.clear();
        Ok(())
    }

    fn node_finished(&mut self, id: &NodeId, outcome: NodeOutcome) -> Result<()> {
        let (state, node) = match self.entries.get(id) {
            Some(entry) => (entry.state, entry.node.clone()),
            None => {
                return Err(RundagError::IllegalState(format!(
                    "finished node '{id}' is not part of the plan"
                )));
            }
        };

        let target = match &outcome {
            NodeOutcome::Completed | NodeOutcome::UpToDate => NodeState::Completed,
            NodeOutcome::Failed(_) => NodeState::Failed,
            NodeOutcome::Skipped(_) => NodeState::Skipped,
        };

        if state != NodeState::Executing {
            return Err(RundagError::IllegalStateTransition {
                node: id.clone(),
                from: state,
                to: target,
            });
        }

        self.transition(id, target)?;
        self.executing -= 1;
        self.locks.release_all(id, node.locks())?;

        match outcome {
            NodeOutcome::Completed | NodeOutcome::UpToDate => {
                if self.halt.is_none() {
                    self.queue_ready_dependents(id);
                }
            }
            NodeOutcome::Failed(failure) => {
                warn!(node = %id, error = %failure.error, "node failed");
                if let Some(entry) = self.entries.get_mut(id) {
                    entry.failure = Some(failure.clone());
                }
                self.failures.push(failure);
                self.skip_dependents(id)?;

                if !self.continue_on_failure && self.halt.is_none() {
                    info!(node = %id, "continue-on-failure disabled; aborting remaining work");
                    self.halt = Some(Halt::Aborted);
                }
            }
            NodeOutcome::Skipped(_) => {}
        }
        Ok(())
    }

    fn queue_ready_dependents(&mut self, id: &NodeId) {
        let Some(graph) = self.graph.take() else {
            return;
        };

        for dependent in graph.dependents_of(id) {
            if self.is_pending_and_ready(&graph, &dependent) {
                if let (Some(entry), Some(pos)) = (
                    self.entries.get_mut(&dependent),
                    graph.position_of(&dependent),
                ) {
                    entry.state = NodeState::Queued;
                    self.ready.insert(pos, dependent.clone());
                    debug!(node = %dependent, "dependencies satisfied; node queued");
                }
            }
        }

        self.graph = Some(graph);
    }

    /// Skip every pending node downstream of a failed node.
    fn skip_dependents(&mut self, id: &NodeId) -> Result<()> {
        let Some(graph) = self.graph.take() else {
            return Ok(());
        };

        let mut stack = graph.dependents_of(id);
        let mut result = Ok(());
        while let Some(dependent) = stack.pop() {
            let pending = self
                .entries
                .get(&dependent)
                .is_some_and(|e| e.state == NodeState::Pending);
            if !pending {
                continue;
            }
            if let Err(err) = self.skip(&dependent, SkipReason::DependencyFailed) {
                result = Err(err);
                break;
            }
            stack.extend(graph.dependents_of(&dependent));
        }

        self.graph = Some(graph);
        result
    }
}
