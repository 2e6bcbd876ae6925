// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile, to_catalog};
use crate::dag::{GraphBuilder, NodeId, NodeRegistry};
use crate::errors::{Result, RundagError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RundagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_locks(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(RundagError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.workers == 0 {
        return Err(RundagError::ConfigError(
            "[config].workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.cache_dir.trim().is_empty() {
        return Err(RundagError::ConfigError(
            "[config].cache_dir must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if !cfg.task.contains_key(dep) {
                return Err(RundagError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_locks(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if task.locks.iter().any(|lock| lock.trim().is_empty()) {
            return Err(RundagError::ConfigError(format!(
                "task '{}' declares an empty lock name in `locks`",
                name
            )));
        }
    }
    Ok(())
}

/// Resolve every task once so cycles are reported with their full path.
fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    let catalog = to_catalog(&cfg.task);
    let all: Vec<NodeId> = catalog.ids().cloned().collect();
    let mut registry = NodeRegistry::new();
    GraphBuilder::new(&catalog).build(&mut registry, &all)?;
    Ok(())
}
