// src/dag/registry.rs

//! Registry of every work node reachable from the requested roots.

use std::collections::HashMap;

use crate::dag::node::{NodeId, WorkNode};

/// Owns one [`WorkNode`] per identity.
///
/// A node is only registered once its dependencies have been resolved, so
/// membership doubles as the "visited" memo of the graph builder and the
/// registration order is a valid topological order.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<NodeId, WorkNode>,
    /// Registration order (dependencies before dependents).
    order: Vec<NodeId>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&WorkNode> {
        self.nodes.get(id)
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &WorkNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register a node. Returns `false` (and keeps the existing node) if the
    /// identity is already known.
    pub(crate) fn register(&mut self, node: WorkNode) -> bool {
        if self.nodes.contains_key(node.id()) {
            return false;
        }
        self.order.push(node.id().clone());
        self.nodes.insert(node.id().clone(), node);
        true
    }

    /// Drop the given nodes again (used to undo a failed build).
    pub(crate) fn unregister_all(&mut self, ids: &[NodeId]) {
        for id in ids {
            self.nodes.remove(id);
        }
        self.order.retain(|id| self.nodes.contains_key(id));
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.order.clear();
    }
}
