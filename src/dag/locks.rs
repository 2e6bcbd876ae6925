// src/dag/locks.rs

//! Named resource locks held by executing nodes.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::dag::node::NodeId;
use crate::errors::{Result, RundagError};

/// Set-based mutual exclusion table keyed by lock name.
///
/// Lives inside the plan's critical section, so it needs no locking of its
/// own. A node's locks are taken all at once in canonical (sorted) order, or
/// not at all.
#[derive(Debug, Default)]
pub struct ResourceLockTable {
    /// Lock name -> node currently holding it.
    held: BTreeMap<String, NodeId>,
}

impl ResourceLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every lock in `locks` is currently free.
    pub fn all_free(&self, locks: &BTreeSet<String>) -> bool {
        locks.iter().all(|name| !self.held.contains_key(name))
    }

    /// Acquire every lock in `locks` for `owner`, or none of them.
    ///
    /// Returns `false` without side effects if any lock is taken.
    pub fn try_acquire_all(&mut self, owner: &NodeId, locks: &BTreeSet<String>) -> bool {
        if !self.all_free(locks) {
            return false;
        }
        for name in locks {
            trace!(lock = %name, node = %owner, "lock acquired");
            self.held.insert(name.clone(), owner.clone());
        }
        true
    }

    /// Release every lock in `locks` held by `owner`.
    ///
    /// Releasing a lock that `owner` does not hold means the scheduling state
    /// is corrupt; nothing is released in that case.
    pub fn release_all(&mut self, owner: &NodeId, locks: &BTreeSet<String>) -> Result<()> {
        for name in locks {
            match self.held.get(name) {
                Some(holder) if holder == owner => {}
                Some(holder) => {
                    return Err(RundagError::LockAcquisition(format!(
                        "node '{owner}' released lock '{name}' held by '{holder}'"
                    )));
                }
                None => {
                    return Err(RundagError::LockAcquisition(format!(
                        "node '{owner}' released lock '{name}' which is not held"
                    )));
                }
            }
        }
        for name in locks {
            trace!(lock = %name, node = %owner, "lock released");
            self.held.remove(name);
        }
        Ok(())
    }

    /// Current holder of a lock.
    pub fn holder_of(&self, name: &str) -> Option<&NodeId> {
        self.held.get(name)
    }

    pub(crate) fn clear(&mut self) {
        self.held.clear();
    }
}
