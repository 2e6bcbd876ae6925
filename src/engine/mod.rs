// src/engine/mod.rs

//! Execution engine.
//!
//! - [`coordinator`] runs the worker pool against an execution plan and
//!   produces a [`RunReport`].
//! - [`listeners`] broadcasts graph and node lifecycle events.
//! - [`execution_graph`] is the facade build tools drive.

pub mod coordinator;
pub mod execution_graph;
pub mod listeners;

pub use coordinator::{RunReport, WorkerCoordinator};
pub use execution_graph::ExecutionGraph;
pub use listeners::{
    GraphListener, ListenerBroadcaster, ListenerFailure, ListenerHook, ListenerId, NodeListener,
};
