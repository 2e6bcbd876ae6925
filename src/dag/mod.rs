// src/dag/mod.rs

//! Work graph construction and scheduling.
//!
//! - [`node`] defines work units, node identity, node states and outcomes.
//! - [`source`] is the interface work units are resolved through.
//! - [`registry`] holds one node per identity for a plan.
//! - [`builder`] resolves requested units into a DAG and rejects cycles.
//! - [`graph`] is the immutable adjacency view used for scheduling.
//! - [`locks`] is the named resource lock table.
//! - [`plan`] contains the scheduling state machine workers pull from.

pub mod builder;
pub mod graph;
pub mod locks;
pub mod node;
pub mod plan;
pub mod registry;
pub mod source;

pub use builder::{CycleError, GraphBuilder};
pub use graph::DagGraph;
pub use locks::ResourceLockTable;
pub use node::{
    NodeAction, NodeFailure, NodeId, NodeOutcome, NodeState, SkipReason, Work, WorkNode, WorkUnit,
};
pub use plan::{ExecutionPlan, GraphState, NodeFilter, Selection};
pub use registry::NodeRegistry;
pub use source::{UnitCatalog, WorkSource};
