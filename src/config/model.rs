// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::dag::{NodeId, UnitCatalog, Work, WorkUnit};
use crate::exec::cache::CACHE_DIR_PATH;
use crate::types::BuildCacheMode;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// workers = 4
/// continue_on_failure = false
/// cache = "file"
///
/// [task.compile]
/// cmd = "cargo build"
/// after = ["generate"]
/// locks = ["project:app"]
/// cache_key = "v1"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Keys are the task names (e.g. `"compile"`).
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// A validated configuration. Obtain one through
/// [`load_and_validate`](crate::config::load_and_validate) or `TryFrom`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(config: ConfigSection, task: BTreeMap<String, TaskConfig>) -> Self {
        Self { config, task }
    }

    /// Every task name, sorted.
    pub fn task_ids(&self) -> Vec<NodeId> {
        self.task.keys().map(|name| NodeId::new(name.as_str())).collect()
    }

    /// Turn the tasks into work units.
    pub fn to_catalog(&self) -> UnitCatalog {
        to_catalog(&self.task)
    }
}

pub(crate) fn to_catalog(tasks: &BTreeMap<String, TaskConfig>) -> UnitCatalog {
    tasks.iter().map(|(name, task)| task.to_unit(name)).collect()
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Number of workers executing nodes in parallel.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Keep running independent work after a node fails.
    #[serde(default)]
    pub continue_on_failure: bool,

    #[serde(default)]
    pub cache: BuildCacheMode,

    /// Directory of the file cache, relative to the config file.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_cache_dir() -> String {
    CACHE_DIR_PATH.to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            continue_on_failure: false,
            cache: BuildCacheMode::default(),
            cache_dir: default_cache_dir(),
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskConfig {
    /// Shell command to run. A task without one only aggregates its
    /// dependencies.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Display name; defaults to the task name.
    #[serde(default)]
    pub name: Option<String>,

    /// This task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// Resource locks held while the task runs.
    #[serde(default)]
    pub locks: Vec<String>,

    /// Fingerprint enabling build-cache lookups.
    #[serde(default)]
    pub cache_key: Option<String>,
}

impl TaskConfig {
    pub fn to_unit(&self, name: &str) -> WorkUnit {
        let work = match &self.cmd {
            Some(cmd) => Work::Command(cmd.clone()),
            None => Work::Noop,
        };

        let mut unit = WorkUnit::new(name, work);
        if let Some(display) = &self.name {
            unit.display_name = display.clone();
        }
        unit.dependencies = self.after.iter().map(|d| NodeId::new(d.as_str())).collect();
        unit.locks = self.locks.iter().cloned().collect();
        unit.cache_key = self.cache_key.clone();
        unit
    }
}
