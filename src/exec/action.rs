// src/exec/action.rs

//! Executor for in-process actions and no-op units.

use std::any::Any;

use anyhow::anyhow;
use tracing::debug;

use crate::dag::{NodeFailure, NodeOutcome, Work, WorkNode};
use crate::exec::backend::{ExecFuture, NodeExecutor};

/// Runs [`Work::Action`] closures on Tokio's blocking pool so long actions
/// never stall the scheduler, and completes [`Work::Noop`] units directly.
///
/// A panicking action fails its node; it does not take the worker down.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionExecutor;

impl ActionExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl NodeExecutor for ActionExecutor {
    fn name(&self) -> &str {
        "action"
    }

    fn accepts(&self, node: &WorkNode) -> bool {
        matches!(node.work(), Work::Action(_) | Work::Noop)
    }

    fn execute<'a>(&'a self, node: &'a WorkNode) -> ExecFuture<'a> {
        Box::pin(async move {
            let action = match node.work() {
                Work::Action(action) => action.clone(),
                _ => {
                    debug!(node = %node.id(), "nothing to run for no-op node");
                    return Ok(NodeOutcome::Completed);
                }
            };

            let owned = node.clone();
            let joined = tokio::task::spawn_blocking(move || action(&owned)).await;

            let outcome = match joined {
                Ok(Ok(())) => NodeOutcome::Completed,
                Ok(Err(err)) => NodeOutcome::Failed(NodeFailure::new(node, err)),
                Err(join_err) if join_err.is_panic() => NodeOutcome::Failed(NodeFailure::new(
                    node,
                    anyhow!("action panicked: {}", panic_message(&*join_err.into_panic())),
                )),
                Err(join_err) => NodeOutcome::Failed(NodeFailure::new(
                    node,
                    anyhow!("action did not complete: {join_err}"),
                )),
            };
            Ok(outcome)
        })
    }
}

/// Text of a panic payload, for panics caught at an isolation boundary.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
