#![allow(dead_code)]

use std::collections::BTreeMap;

use rundag::config::{ConfigFile, ConfigSection, RawConfigFile, TaskConfig};
use rundag::dag::{NodeId, UnitCatalog, Work, WorkNode, WorkUnit};

/// Turn string literals into node ids.
pub fn ids(names: &[&str]) -> Vec<NodeId> {
    names.iter().map(|n| NodeId::new(*n)).collect()
}

/// Builder for a single [`WorkUnit`]. Units are no-ops unless given work.
pub struct UnitBuilder {
    unit: WorkUnit,
}

impl UnitBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            unit: WorkUnit::new(id, Work::Noop),
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.unit.dependencies.push(NodeId::new(dep));
        self
    }

    pub fn lock(mut self, name: &str) -> Self {
        self.unit.locks.insert(name.to_string());
        self
    }

    pub fn name(mut self, display_name: &str) -> Self {
        self.unit.display_name = display_name.to_string();
        self
    }

    pub fn cache_key(mut self, key: &str) -> Self {
        self.unit.cache_key = Some(key.to_string());
        self
    }

    pub fn command(mut self, cmd: &str) -> Self {
        self.unit.work = Work::Command(cmd.to_string());
        self
    }

    pub fn action<F>(mut self, f: F) -> Self
    where
        F: Fn(&WorkNode) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.unit.work = Work::action(f);
        self
    }

    pub fn build(self) -> WorkUnit {
        self.unit
    }
}

/// Builder for a [`UnitCatalog`].
#[derive(Default)]
pub struct CatalogBuilder {
    catalog: UnitCatalog,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, unit: UnitBuilder) -> Self {
        self.catalog.insert(unit.build());
        self
    }

    /// No-op unit depending on `deps`.
    pub fn node(self, id: &str, deps: &[&str]) -> Self {
        let unit = deps
            .iter()
            .fold(UnitBuilder::new(id), |unit, dep| unit.after(dep));
        self.with(unit)
    }

    pub fn build(self) -> UnitCatalog {
        self.catalog
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.config.workers = workers;
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: Some(cmd.to_string()),
                ..TaskConfig::default()
            },
        }
    }

    /// Task with no command.
    pub fn aggregate() -> Self {
        Self {
            task: TaskConfig::default(),
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn lock(mut self, name: &str) -> Self {
        self.task.locks.push(name.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
