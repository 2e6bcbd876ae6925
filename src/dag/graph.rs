// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::dag::node::NodeId;
use crate::dag::registry::NodeRegistry;

/// Immutable adjacency view over a populated plan.
///
/// Edge direction: dependency -> dependent. The execution order is the
/// registry's registration order, which puts every dependency before its
/// dependents and otherwise follows the order work was requested in.
#[derive(Debug, Clone)]
pub struct DagGraph {
    graph: DiGraph<NodeId, ()>,
    index: HashMap<NodeId, NodeIndex>,
    order: Vec<NodeId>,
    position: HashMap<NodeId, usize>,
}

impl DagGraph {
    /// Build the graph for every node in `registry`.
    ///
    /// The registry only ever contains fully resolved, acyclic closures (the
    /// builder rejects cycles), so this cannot fail.
    pub fn from_registry(registry: &NodeRegistry) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut order = Vec::with_capacity(registry.len());
        let mut position = HashMap::new();

        for node in registry.nodes() {
            let idx = graph.add_node(node.id().clone());
            index.insert(node.id().clone(), idx);
            position.insert(node.id().clone(), order.len());
            order.push(node.id().clone());
        }

        for node in registry.nodes() {
            let to = index[node.id()];
            for dep in node.dependencies() {
                if let Some(&from) = index.get(dep) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        debug_assert!(!is_cyclic_directed(&graph));

        Self {
            graph,
            index,
            order,
            position,
        }
    }

    /// All node ids in execution order.
    pub fn execution_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Position of a node in the execution order.
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.position.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Immediate dependencies, in execution order.
    pub fn dependencies_of(&self, id: &str) -> Vec<NodeId> {
        self.neighbours(id, Direction::Incoming)
    }

    /// Immediate dependents, in execution order.
    pub fn dependents_of(&self, id: &str) -> Vec<NodeId> {
        self.neighbours(id, Direction::Outgoing)
    }

    /// All `(dependency, dependent)` edges, sorted.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges: Vec<(NodeId, NodeId)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(from, to)| (self.graph[from].clone(), self.graph[to].clone()))
            .collect();
        edges.sort();
        edges
    }

    fn neighbours(&self, id: &str, direction: Direction) -> Vec<NodeId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };

        let mut ids: Vec<NodeId> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        ids.sort_by_key(|n| self.position.get(n).copied().unwrap_or(usize::MAX));
        ids.dedup();
        ids
    }
}
