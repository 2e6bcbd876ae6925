// src/engine/coordinator.rs

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dag::{ExecutionPlan, NodeFailure, NodeId, NodeOutcome, NodeState, WorkNode};
use crate::engine::listeners::{ListenerBroadcaster, ListenerFailure};
use crate::errors::{Result, RundagError};
use crate::exec::ExecutorChain;

/// Summary of one run of a plan.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Node failures in the order they happened.
    pub failures: Vec<NodeFailure>,
    pub listener_failures: Vec<ListenerFailure>,
    pub cancelled: bool,
    /// Final state of every node.
    pub states: BTreeMap<NodeId, NodeState>,
    pub elapsed: Duration,
}

impl RunReport {
    /// No node failed and the run was not cancelled.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }
}

/// Runs a fixed pool of workers against an [`ExecutionPlan`].
///
/// Each worker loops: claim a node, notify `before` listeners, execute it
/// through the [`ExecutorChain`], notify `after` listeners, report the
/// outcome. A worker exits once the plan says it is finished.
#[derive(Debug, Clone, Copy)]
pub struct WorkerCoordinator {
    worker_count: usize,
}

impl WorkerCoordinator {
    pub fn new(worker_count: usize) -> Result<Self> {
        if worker_count == 0 {
            return Err(RundagError::ConfigError(
                "worker count must be at least 1".to_string(),
            ));
        }
        Ok(Self { worker_count })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Execute `plan` to completion.
    ///
    /// Node failures end up in the report. An `Err` means the run itself
    /// broke down (unknown work type, inconsistent scheduling state, a
    /// crashed worker); the plan is aborted and the first such error is
    /// returned once every worker has stopped.
    pub async fn run(
        &self,
        plan: Arc<ExecutionPlan>,
        chain: Arc<ExecutorChain>,
        listeners: Arc<ListenerBroadcaster>,
    ) -> Result<RunReport> {
        let started = Instant::now();
        plan.populate()?;
        listeners.notify_graph_populated(&plan);

        info!(
            workers = self.worker_count,
            nodes = plan.size(),
            "starting execution"
        );

        let mut workers = JoinSet::new();
        for worker in 0..self.worker_count {
            workers.spawn(worker_loop(
                worker,
                Arc::clone(&plan),
                Arc::clone(&chain),
                Arc::clone(&listeners),
            ));
        }

        let mut first_error: Option<RundagError> = None;
        while let Some(joined) = workers.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_err) => Err(RundagError::Other(anyhow!(
                    "worker task failed: {join_err}"
                ))),
            };
            if let Err(err) = result {
                plan.abort();
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    debug!(error = %err, "additional worker error after abort");
                }
            }
        }

        if let Some(err) = first_error {
            error!(error = %err, "execution aborted");
            // Every worker has stopped, so nodes still executing were
            // orphaned by the failed worker.
            match plan.abandon_executing(&err.to_string()) {
                Ok(0) => {}
                Ok(abandoned) => debug!(abandoned, "released nodes of stopped workers"),
                Err(abandon_err) => {
                    warn!(error = %abandon_err, "could not release nodes of stopped workers")
                }
            }
            return Err(err);
        }

        let report = RunReport {
            failures: plan.collect_failures(),
            listener_failures: listeners.take_failures(),
            cancelled: plan.is_cancelled(),
            states: plan.states(),
            elapsed: started.elapsed(),
        };

        info!(
            completed = report.count(NodeState::Completed),
            failed = report.count(NodeState::Failed),
            skipped = report.count(NodeState::Skipped),
            cancelled = report.cancelled,
            elapsed = ?report.elapsed,
            "execution finished"
        );
        Ok(report)
    }
}

async fn worker_loop(
    worker: usize,
    plan: Arc<ExecutionPlan>,
    chain: Arc<ExecutorChain>,
    listeners: Arc<ListenerBroadcaster>,
) -> Result<()> {
    debug!(worker, "worker started");

    while let Some(node) = plan.next_node().await? {
        let outcome = match execute_node(worker, &node, &chain, &listeners).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(worker, node = %node.id(), error = %err, "node could not be executed");
                plan.abort();
                return Err(err);
            }
        };

        if let Err(err) = plan.node_finished(node.id(), outcome) {
            plan.abort();
            return Err(err);
        }
    }

    debug!(worker, "worker finished");
    Ok(())
}

async fn execute_node(
    worker: usize,
    node: &WorkNode,
    chain: &ExecutorChain,
    listeners: &ListenerBroadcaster,
) -> Result<NodeOutcome> {
    let started = Instant::now();
    info!(worker, node = %node.id(), "executing node");

    listeners.notify_before_node(node);
    let outcome = chain.execute(node).await?;

    match &outcome {
        NodeOutcome::Completed => {
            info!(worker, node = %node.id(), elapsed = ?started.elapsed(), "node completed")
        }
        NodeOutcome::UpToDate => info!(worker, node = %node.id(), "node up to date"),
        NodeOutcome::Failed(failure) => {
            warn!(worker, node = %node.id(), elapsed = ?started.elapsed(), "{failure}")
        }
        NodeOutcome::Skipped(reason) => debug!(worker, node = %node.id(), %reason, "node skipped"),
    }

    listeners.notify_after_node(node, &outcome);
    Ok(outcome)
}
