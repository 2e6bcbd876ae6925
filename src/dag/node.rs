// src/dag/node.rs

//! Work node identity, per-node states and execution outcomes.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Stable, comparable identity of a work unit (e.g. `":app:compile"`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl Deref for NodeId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

/// In-process action attached to a work unit.
pub type NodeAction = Arc<dyn Fn(&WorkNode) -> anyhow::Result<()> + Send + Sync>;

/// What a work node actually does when executed.
///
/// Executors in the [`ExecutorChain`](crate::exec::ExecutorChain) decide
/// which kinds they accept.
#[derive(Clone)]
pub enum Work {
    /// Run a closure in-process.
    Action(NodeAction),
    /// Run a shell command.
    Command(String),
    /// Lifecycle/aggregate unit with nothing to run.
    Noop,
}

impl Work {
    pub fn action<F>(f: F) -> Self
    where
        F: Fn(&WorkNode) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Work::Action(Arc::new(f))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Work::Action(_) => "action",
            Work::Command(_) => "command",
            Work::Noop => "noop",
        }
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Work::Action(_) => f.write_str("Action(..)"),
            Work::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
            Work::Noop => f.write_str("Noop"),
        }
    }
}

/// A unit of work as supplied by a [`WorkSource`](crate::dag::WorkSource).
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub id: NodeId,
    pub display_name: String,
    /// Direct dependencies. Duplicates are ignored when the node is built.
    pub dependencies: Vec<NodeId>,
    /// Named resource locks that must all be held while this unit executes.
    pub locks: BTreeSet<String>,
    pub work: Work,
    /// Fingerprint enabling build-cache lookups; `None` disables caching.
    pub cache_key: Option<String>,
}

impl WorkUnit {
    pub fn new(id: impl Into<NodeId>, work: Work) -> Self {
        let id = id.into();
        Self {
            display_name: id.to_string(),
            id,
            dependencies: Vec::new(),
            locks: BTreeSet::new(),
            work,
            cache_key: None,
        }
    }
}

#[derive(Debug)]
struct NodeInner {
    id: NodeId,
    display_name: String,
    dependencies: Vec<NodeId>,
    locks: BTreeSet<String>,
    work: Work,
    cache_key: Option<String>,
}

/// Immutable handle to a node of an execution plan.
///
/// Cheap to clone. The mutable per-node state lives in the
/// [`ExecutionPlan`](crate::dag::ExecutionPlan), which is the only place
/// allowed to transition it.
#[derive(Clone)]
pub struct WorkNode {
    inner: Arc<NodeInner>,
}

impl WorkNode {
    /// Build a node from its unit, keeping the first occurrence of each
    /// dependency.
    pub(crate) fn from_unit(unit: WorkUnit) -> Self {
        let mut seen = BTreeSet::new();
        let dependencies = unit
            .dependencies
            .into_iter()
            .filter(|dep| seen.insert(dep.clone()))
            .collect();

        Self {
            inner: Arc::new(NodeInner {
                id: unit.id,
                display_name: unit.display_name,
                dependencies,
                locks: unit.locks,
                work: unit.work,
                cache_key: unit.cache_key,
            }),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.inner.id
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.inner.dependencies
    }

    /// Required locks, in canonical (sorted) acquisition order.
    pub fn locks(&self) -> &BTreeSet<String> {
        &self.inner.locks
    }

    pub fn work(&self) -> &Work {
        &self.inner.work
    }

    pub fn cache_key(&self) -> Option<&str> {
        self.inner.cache_key.as_deref()
    }
}

impl PartialEq for WorkNode {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for WorkNode {}

impl fmt::Debug for WorkNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkNode")
            .field("id", &self.inner.id)
            .field("display_name", &self.inner.display_name)
            .field("dependencies", &self.inner.dependencies)
            .field("locks", &self.inner.locks)
            .field("work", &self.inner.work)
            .finish()
    }
}

/// Per-node state inside an execution plan.
///
/// States only ever advance: `Pending -> Queued -> Executing -> terminal`,
/// with `Pending`/`Queued` allowed to jump straight to `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Dependencies not all terminal yet.
    Pending,
    /// Dependencies done; waiting for a worker and free locks.
    Queued,
    /// Claimed by exactly one worker, locks held.
    Executing,
    Completed,
    Failed,
    Skipped,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::Completed | NodeState::Failed | NodeState::Skipped
        )
    }

    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Skipped)
                | (Queued, Executing)
                | (Queued, Skipped)
                | (Executing, Completed)
                | (Executing, Failed)
        )
    }
}

/// Why a node ended up `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Excluded by the plan filter. Does not block dependents.
    Filtered,
    /// A (transitive) dependency failed or was skipped for a blocking reason.
    DependencyFailed,
    /// The plan was aborted (first failure without continue-on-failure, or a
    /// fatal coordination error).
    Aborted,
    /// The run was cancelled before the node started.
    Cancelled,
}

impl SkipReason {
    /// Whether dependents of a node skipped for this reason must be skipped too.
    pub fn blocks_dependents(self) -> bool {
        !matches!(self, SkipReason::Filtered)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Filtered => "filtered",
            SkipReason::DependencyFailed => "dependency failed",
            SkipReason::Aborted => "aborted",
            SkipReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Error raised by a node's own work.
#[derive(Debug, Clone)]
pub struct NodeFailure {
    pub node: NodeId,
    pub display_name: String,
    pub error: Arc<anyhow::Error>,
}

impl NodeFailure {
    pub fn new(node: &WorkNode, error: anyhow::Error) -> Self {
        Self {
            node: node.id().clone(),
            display_name: node.display_name().to_string(),
            error: Arc::new(error),
        }
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution failed for '{}': {:#}", self.display_name, self.error)
    }
}

/// Result of executing (or not executing) a node.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Completed,
    /// Satisfied from the build cache; the work itself did not run.
    UpToDate,
    Failed(NodeFailure),
    Skipped(SkipReason),
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, NodeOutcome::Completed | NodeOutcome::UpToDate)
    }
}
