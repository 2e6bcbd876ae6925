// src/dag/source.rs

//! Where work units come from.

use std::collections::BTreeMap;

use crate::dag::node::{NodeId, WorkUnit};

/// Supplies work units by identity.
///
/// Implemented by whatever declares the work (a config file, a test, a
/// plugin). The graph builder resolves each identity at most once per plan.
pub trait WorkSource: Send + Sync {
    fn resolve(&self, id: &NodeId) -> Option<WorkUnit>;
}

/// In-memory [`WorkSource`] keyed by node identity.
#[derive(Debug, Clone, Default)]
pub struct UnitCatalog {
    units: BTreeMap<NodeId, WorkUnit>,
}

impl UnitCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a unit, replacing any previous unit with the same identity.
    pub fn insert(&mut self, unit: WorkUnit) -> Option<WorkUnit> {
        self.units.insert(unit.id.clone(), unit)
    }

    pub fn get(&self, id: &str) -> Option<&WorkUnit> {
        self.units.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.units.keys()
    }

    pub fn units(&self) -> impl Iterator<Item = &WorkUnit> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl WorkSource for UnitCatalog {
    fn resolve(&self, id: &NodeId) -> Option<WorkUnit> {
        self.units.get(id).cloned()
    }
}

impl FromIterator<WorkUnit> for UnitCatalog {
    fn from_iter<T: IntoIterator<Item = WorkUnit>>(iter: T) -> Self {
        let mut catalog = UnitCatalog::new();
        for unit in iter {
            catalog.insert(unit);
        }
        catalog
    }
}
