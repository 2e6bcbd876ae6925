// src/engine/listeners.rs

//! Listener registration and broadcasting.
//!
//! Listener sets are copy-on-write: a broadcast iterates the snapshot taken
//! when it started, so adding or removing a listener only affects later
//! deliveries and never races with one in progress.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::anyhow;
use tracing::{debug, warn};

use crate::dag::{ExecutionPlan, NodeId, NodeOutcome, WorkNode};
use crate::exec::action::panic_message;

/// Notified once each time a plan becomes populated.
pub trait GraphListener: Send + Sync {
    fn graph_populated(&self, plan: &ExecutionPlan) -> anyhow::Result<()>;
}

/// Notified around the execution of every node, on the executing worker.
pub trait NodeListener: Send + Sync {
    fn before_node(&self, _node: &WorkNode) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_node(&self, _node: &WorkNode, _outcome: &NodeOutcome) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handle returned on registration, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerHook {
    GraphPopulated,
    BeforeNode,
    AfterNode,
}

impl fmt::Display for ListenerHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListenerHook::GraphPopulated => "graph populated",
            ListenerHook::BeforeNode => "before node",
            ListenerHook::AfterNode => "after node",
        };
        f.write_str(s)
    }
}

/// A listener that returned an error. Recorded as a diagnostic; it never
/// changes the outcome of the node it was notified about.
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    pub listener: ListenerId,
    pub hook: ListenerHook,
    pub node: Option<NodeId>,
    pub error: Arc<anyhow::Error>,
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(
                f,
                "{} listener failed for '{}': {:#}",
                self.hook, node, self.error
            ),
            None => write!(f, "{} listener failed: {:#}", self.hook, self.error),
        }
    }
}

type Registered<L> = Arc<Vec<(ListenerId, Arc<L>)>>;

/// Fans lifecycle events out to registered listeners in registration order.
pub struct ListenerBroadcaster {
    graph_listeners: RwLock<Registered<dyn GraphListener>>,
    node_listeners: RwLock<Registered<dyn NodeListener>>,
    next_id: AtomicU64,
    /// Population counter of the last plan state graph listeners were told about.
    notified_population: Mutex<Option<u64>>,
    failures: Mutex<Vec<ListenerFailure>>,
}

impl Default for ListenerBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBroadcaster")
            .field("graph_listeners", &self.graph_listener_count())
            .field("node_listeners", &self.node_listener_count())
            .finish_non_exhaustive()
    }
}

impl ListenerBroadcaster {
    pub fn new() -> Self {
        Self {
            graph_listeners: RwLock::new(Arc::new(Vec::new())),
            node_listeners: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(0),
            notified_population: Mutex::new(None),
            failures: Mutex::new(Vec::new()),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    // ----- registration ----------------------------------------------------

    pub fn add_graph_listener(&self, listener: Arc<dyn GraphListener>) -> ListenerId {
        let id = self.next_id();
        push(&self.graph_listeners, id, listener);
        id
    }

    pub fn add_node_listener(&self, listener: Arc<dyn NodeListener>) -> ListenerId {
        let id = self.next_id();
        push(&self.node_listeners, id, listener);
        id
    }

    pub fn remove_graph_listener(&self, id: ListenerId) -> bool {
        remove(&self.graph_listeners, id)
    }

    pub fn remove_node_listener(&self, id: ListenerId) -> bool {
        remove(&self.node_listeners, id)
    }

    /// Remove a listener of either kind. Returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.remove_graph_listener(id) || self.remove_node_listener(id)
    }

    /// Run `f` once the plan is populated.
    pub fn when_ready<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&ExecutionPlan) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_graph_listener(Arc::new(WhenReady(f)))
    }

    /// Run `f` before each node executes.
    pub fn before_node<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&WorkNode) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_node_listener(Arc::new(BeforeNode(f)))
    }

    /// Run `f` after each node executes.
    pub fn after_node<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&WorkNode, &NodeOutcome) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_node_listener(Arc::new(AfterNode(f)))
    }

    pub fn graph_listener_count(&self) -> usize {
        snapshot(&self.graph_listeners).len()
    }

    pub fn node_listener_count(&self) -> usize {
        snapshot(&self.node_listeners).len()
    }

    // ----- broadcasting ----------------------------------------------------

    /// Tell graph listeners that `plan` is populated.
    ///
    /// Fires at most once per population of the plan, and only when at least
    /// one graph listener is registered.
    pub fn notify_graph_populated(&self, plan: &ExecutionPlan) {
        let listeners = snapshot(&self.graph_listeners);
        if listeners.is_empty() {
            return;
        }

        let population = plan.population();
        {
            let mut notified = self
                .notified_population
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *notified == Some(population) {
                warn!("ignoring listeners of graph ready event, as this plan has already been notified");
                return;
            }
            *notified = Some(population);
        }

        debug!(listeners = listeners.len(), population, "notifying graph listeners");
        for (id, listener) in listeners.iter() {
            if let Err(err) = isolated(|| listener.graph_populated(plan)) {
                self.record(*id, ListenerHook::GraphPopulated, None, err);
                break;
            }
        }
    }

    pub fn notify_before_node(&self, node: &WorkNode) {
        let listeners = snapshot(&self.node_listeners);
        for (id, listener) in listeners.iter() {
            if let Err(err) = isolated(|| listener.before_node(node)) {
                self.record(*id, ListenerHook::BeforeNode, Some(node.id().clone()), err);
                break;
            }
        }
    }

    pub fn notify_after_node(&self, node: &WorkNode, outcome: &NodeOutcome) {
        let listeners = snapshot(&self.node_listeners);
        for (id, listener) in listeners.iter() {
            if let Err(err) = isolated(|| listener.after_node(node, outcome)) {
                self.record(*id, ListenerHook::AfterNode, Some(node.id().clone()), err);
                break;
            }
        }
    }

    // ----- diagnostics -----------------------------------------------------

    /// Drain the recorded listener failures.
    pub fn take_failures(&self) -> Vec<ListenerFailure> {
        std::mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn record(
        &self,
        listener: ListenerId,
        hook: ListenerHook,
        node: Option<NodeId>,
        error: anyhow::Error,
    ) {
        let failure = ListenerFailure {
            listener,
            hook,
            node,
            error: Arc::new(error),
        };
        warn!(listener = ?failure.listener, "{failure}");
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }
}

/// Call a listener, turning a panic into an error like any other.
fn isolated(call: impl FnOnce() -> anyhow::Result<()>) -> anyhow::Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("listener panicked: {}", panic_message(&*payload))),
    }
}

fn snapshot<L: ?Sized>(set: &RwLock<Registered<L>>) -> Registered<L> {
    set.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn push<L: ?Sized>(set: &RwLock<Registered<L>>, id: ListenerId, listener: Arc<L>) {
    let mut guard = set.write().unwrap_or_else(PoisonError::into_inner);
    let mut next = Vec::clone(&guard);
    next.push((id, listener));
    *guard = Arc::new(next);
}

fn remove<L: ?Sized>(set: &RwLock<Registered<L>>, id: ListenerId) -> bool {
    let mut guard = set.write().unwrap_or_else(PoisonError::into_inner);
    if !guard.iter().any(|(existing, _)| *existing == id) {
        return false;
    }
    let next: Vec<(ListenerId, Arc<L>)> = guard
        .iter()
        .filter(|(existing, _)| *existing != id)
        .cloned()
        .collect();
    *guard = Arc::new(next);
    true
}

struct WhenReady<F>(F);

impl<F> GraphListener for WhenReady<F>
where
    F: Fn(&ExecutionPlan) -> anyhow::Result<()> + Send + Sync,
{
    fn graph_populated(&self, plan: &ExecutionPlan) -> anyhow::Result<()> {
        (self.0)(plan)
    }
}

struct BeforeNode<F>(F);

impl<F> NodeListener for BeforeNode<F>
where
    F: Fn(&WorkNode) -> anyhow::Result<()> + Send + Sync,
{
    fn before_node(&self, node: &WorkNode) -> anyhow::Result<()> {
        (self.0)(node)
    }
}

struct AfterNode<F>(F);

impl<F> NodeListener for AfterNode<F>
where
    F: Fn(&WorkNode, &NodeOutcome) -> anyhow::Result<()> + Send + Sync,
{
    fn after_node(&self, node: &WorkNode, outcome: &NodeOutcome) -> anyhow::Result<()> {
        (self.0)(node, outcome)
    }
}
