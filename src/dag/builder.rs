// src/dag/builder.rs

//! Resolves requested work units into a DAG of work nodes.

use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

use tracing::debug;

use crate::dag::node::{NodeId, WorkNode};
use crate::dag::plan::ExecutionPlan;
use crate::dag::registry::NodeRegistry;
use crate::dag::source::WorkSource;
use crate::errors::{Result, RundagError};

/// A dependency cycle, reported as the path that re-enters its first node.
///
/// For `A -> B -> A` the path is `[A, B, A]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    path: Vec<NodeId>,
}

impl CycleError {
    pub fn path(&self) -> &[NodeId] {
        &self.path
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<&str> = self.path.iter().map(NodeId::as_str).collect();
        f.write_str(&rendered.join(" -> "))
    }
}

impl std::error::Error for CycleError {}

/// Stateless builder walking a [`WorkSource`].
///
/// Each call performs a depth-first closure over dependencies. A node is
/// resolved from the source exactly once per registry, however many paths
/// lead to it.
pub struct GraphBuilder<'a> {
    source: &'a dyn WorkSource,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(source: &'a dyn WorkSource) -> Self {
        Self { source }
    }

    /// Resolve `requested` and everything they depend on into `registry`.
    ///
    /// Returns the requested roots, deduplicated, in first-seen order. On
    /// error the registry is left as it was before the call.
    pub fn build(&self, registry: &mut NodeRegistry, requested: &[NodeId]) -> Result<Vec<NodeId>> {
        if requested.is_empty() {
            return Err(RundagError::EmptyRequest);
        }

        let started = Instant::now();
        let mut roots = Vec::new();
        let mut seen = HashSet::new();
        for id in requested {
            if seen.insert(id.clone()) {
                roots.push(id.clone());
            }
        }

        let mut walk = Walk {
            source: self.source,
            registry,
            stack: Vec::new(),
            on_stack: HashSet::new(),
            added: Vec::new(),
        };

        for root in &roots {
            if let Err(err) = walk.visit(root) {
                let added = std::mem::take(&mut walk.added);
                walk.registry.unregister_all(&added);
                return Err(err);
            }
        }

        debug!(
            requested = roots.len(),
            added = walk.added.len(),
            total = walk.registry.len(),
            elapsed = ?started.elapsed(),
            "creating the DAG finished"
        );

        Ok(roots)
    }

    /// Build and populate a fresh plan for `requested`.
    pub fn build_plan(&self, requested: &[NodeId]) -> Result<ExecutionPlan> {
        let plan = ExecutionPlan::new();
        plan.add_to_plan(self.source, requested)?;
        plan.populate()?;
        Ok(plan)
    }
}

/// A node whose dependencies are being visited.
struct Frame {
    node: WorkNode,
    next_dep: usize,
}

/// State of one depth-first walk.
///
/// The walk keeps its own stack of frames, so the depth of a dependency chain
/// is bounded by memory rather than by the thread's stack.
struct Walk<'w> {
    source: &'w dyn WorkSource,
    registry: &'w mut NodeRegistry,
    /// Nodes currently being visited, outermost first.
    stack: Vec<Frame>,
    on_stack: HashSet<NodeId>,
    /// Nodes registered by this walk, for rollback.
    added: Vec<NodeId>,
}

impl Walk<'_> {
    fn visit(&mut self, root: &NodeId) -> Result<()> {
        if self.registry.contains(root) {
            return Ok(());
        }
        self.enter(root)?;

        while let Some(frame) = self.stack.last_mut() {
            let next = frame.node.dependencies().get(frame.next_dep).cloned();
            frame.next_dep += 1;

            match next {
                Some(dep) => {
                    if self.registry.contains(&dep) {
                        continue;
                    }
                    if self.on_stack.contains(&dep) {
                        return Err(self.cycle_through(&dep).into());
                    }
                    self.enter(&dep)?;
                }
                None => {
                    let Some(done) = self.stack.pop() else {
                        break;
                    };
                    let id = done.node.id().clone();
                    self.on_stack.remove(&id);
                    if self.registry.register(done.node) {
                        self.added.push(id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve `id` from the source and push it onto the walk.
    fn enter(&mut self, id: &NodeId) -> Result<()> {
        let unit = self.source.resolve(id).ok_or_else(|| match self.stack.last() {
            Some(parent) => RundagError::UnknownDependency {
                node: parent.node.id().clone(),
                dependency: id.clone(),
            },
            None => RundagError::UnknownNode(id.clone()),
        })?;

        if unit.id != *id {
            return Err(RundagError::IllegalState(format!(
                "work source resolved '{}' to a unit named '{}'",
                id, unit.id
            )));
        }

        self.on_stack.insert(id.clone());
        self.stack.push(Frame {
            node: WorkNode::from_unit(unit),
            next_dep: 0,
        });
        Ok(())
    }

    /// The cycle closed by an edge back to `id`, which is on the stack.
    fn cycle_through(&self, id: &NodeId) -> CycleError {
        let start = self
            .stack
            .iter()
            .position(|frame| frame.node.id() == id)
            .unwrap_or(0);
        let mut path: Vec<NodeId> = self.stack[start..]
            .iter()
            .map(|frame| frame.node.id().clone())
            .collect();
        path.push(id.clone());
        CycleError { path }
    }
}
