use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use rundag::dag::{NodeFailure, NodeOutcome, WorkNode};
use rundag::exec::{ExecFuture, NodeExecutor};

/// One simulated execution.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub node: String,
    pub locks: BTreeSet<String>,
    pub started: Instant,
    pub finished: Instant,
}

impl ExecutionRecord {
    pub fn overlaps(&self, other: &ExecutionRecord) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

/// A fake executor that:
/// - accepts every node
/// - records start order and execution intervals
/// - sleeps for a configurable time to simulate work
/// - fails the nodes it was told to fail
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    started: Arc<Mutex<Vec<String>>>,
    records: Arc<Mutex<Vec<ExecutionRecord>>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, nodes: &[&str]) -> Self {
        self.failing.extend(nodes.iter().map(|n| n.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn with_node_delay(mut self, node: &str, delay: Duration) -> Self {
        self.delays.insert(node.to_string(), delay);
        self
    }

    /// Node ids in the order execution started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Finished executions in completion order.
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn was_executed(&self, node: &str) -> bool {
        self.started.lock().unwrap().iter().any(|n| n == node)
    }
}

impl NodeExecutor for RecordingExecutor {
    fn name(&self) -> &str {
        "recording"
    }

    fn accepts(&self, _node: &WorkNode) -> bool {
        true
    }

    fn execute<'a>(&'a self, node: &'a WorkNode) -> ExecFuture<'a> {
        Box::pin(async move {
            let id = node.id().to_string();
            let started = Instant::now();
            self.started.lock().unwrap().push(id.clone());

            let delay = self.delays.get(&id).copied().unwrap_or(self.default_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            self.records.lock().unwrap().push(ExecutionRecord {
                node: id.clone(),
                locks: node.locks().clone(),
                started,
                finished: Instant::now(),
            });

            if self.failing.contains(&id) {
                Ok(NodeOutcome::Failed(NodeFailure::new(
                    node,
                    anyhow!("simulated failure of '{id}'"),
                )))
            } else {
                Ok(NodeOutcome::Completed)
            }
        })
    }
}

/// Pairs of executions that share a lock and overlap in time.
pub fn overlapping_lock_holders(records: &[ExecutionRecord]) -> Vec<(String, String, String)> {
    let mut overlaps = Vec::new();
    for (i, a) in records.iter().enumerate() {
        for b in &records[i + 1..] {
            if !a.overlaps(b) {
                continue;
            }
            for lock in a.locks.intersection(&b.locks) {
                overlaps.push((lock.clone(), a.node.clone(), b.node.clone()));
            }
        }
    }
    overlaps
}
