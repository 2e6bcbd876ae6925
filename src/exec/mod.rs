// src/exec/mod.rs

//! Node execution layer.
//!
//! - [`backend`] provides the [`NodeExecutor`] trait and the
//!   [`ExecutorChain`] workers dispatch claimed nodes to.
//! - [`action`] runs in-process closures and no-op units.
//! - [`command`] runs shell commands via `tokio::process::Command`.
//! - [`cache`] contains the build cache consulted before execution.

pub mod action;
pub mod backend;
pub mod cache;
pub mod command;

pub use action::ActionExecutor;
pub use backend::{ExecFuture, ExecutorChain, NodeExecutor};
pub use cache::{BuildCache, BuildCacheController, FileBuildCache, MemoryBuildCache, cache_key_for};
pub use command::CommandExecutor;
