// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! Only infrastructure and construction problems are modelled here. A work
//! node whose own action fails is *not* an error of the run; it is recorded
//! as a [`NodeFailure`](crate::dag::NodeFailure) and reported in the
//! [`RunReport`](crate::engine::RunReport).

use thiserror::Error;

use crate::dag::{CycleError, NodeId, NodeState};

#[derive(Error, Debug)]
pub enum RundagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in work graph: {0}")]
    Cycle(#[from] CycleError),

    #[error("Unknown work unit: {0}")]
    UnknownNode(NodeId),

    #[error("Work unit '{node}' depends on unknown unit '{dependency}'")]
    UnknownDependency { node: NodeId, dependency: NodeId },

    #[error("No work units were requested")]
    EmptyRequest,

    #[error("Lock acquisition error: {0}")]
    LockAcquisition(String),

    #[error("No executor accepts work node '{node}' (unknown type of work)")]
    UnknownWorkType { node: NodeId },

    #[error("Illegal state transition for '{node}': {from:?} -> {to:?}")]
    IllegalStateTransition {
        node: NodeId,
        from: NodeState,
        to: NodeState,
    },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RundagError>;
