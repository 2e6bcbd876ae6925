// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use globset::{Glob, GlobSetBuilder};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{ExecutionPlan, NodeFilter, NodeId, NodeState, UnitCatalog, WorkNode};
use crate::engine::{ExecutionGraph, RunReport};
use crate::exec::{
    ActionExecutor, BuildCacheController, CommandExecutor, ExecutorChain, FileBuildCache,
    MemoryBuildCache,
};
use crate::types::BuildCacheMode;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the execution graph and its executor chain
/// - the optional build cache
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone();
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {:?}", config_path))?;

    let catalog = cfg.to_catalog();
    let requested = requested_tasks(&args, &cfg);
    let filter = exclude_filter(&args.exclude)?;

    if args.dry_run {
        print_dry_run(&cfg, &catalog, &requested, filter)?;
        return Ok(());
    }

    let root_dir = config_root_dir(&config_path);
    let cache_mode = args.cache.unwrap_or(cfg.config.cache);
    let chain = executor_chain(&cfg, cache_mode, &root_dir);
    let workers = args.workers.unwrap_or(cfg.config.workers);

    let graph = ExecutionGraph::new(chain, workers)?;
    graph.set_continue_on_failure(args.continue_on_failure || cfg.config.continue_on_failure)?;
    graph.add_units(&catalog, &requested)?;
    graph.use_filter(filter)?;

    // Ctrl-C → cooperative cancellation.
    {
        let plan = Arc::clone(graph.plan());
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("Ctrl-C received; no new tasks will be started");
            plan.cancel();
        });
    }

    info!(?requested, workers, "running tasks");
    let report = graph.execute().await?;
    print_summary(&report);

    if report.cancelled {
        bail!("execution cancelled");
    }
    if !report.failures.is_empty() {
        bail!("{} task(s) failed", report.failures.len());
    }
    Ok(())
}

/// Project root: the directory holding the config file, or the current
/// working directory for a bare file name.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn requested_tasks(args: &CliArgs, cfg: &ConfigFile) -> Vec<NodeId> {
    if args.tasks.is_empty() {
        cfg.task_ids()
    } else {
        args.tasks.iter().map(|t| NodeId::new(t.as_str())).collect()
    }
}

/// Build the plan filter from `--exclude` globs, matched against task names.
fn exclude_filter(patterns: &[String]) -> Result<Option<NodeFilter>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).with_context(|| format!("invalid --exclude pattern '{pattern}'"))?;
        builder.add(glob);
    }
    let excluded = builder.build().context("building --exclude patterns")?;

    let filter: NodeFilter = Arc::new(move |node: &WorkNode| !excluded.is_match(node.id().as_str()));
    Ok(Some(filter))
}

fn executor_chain(cfg: &ConfigFile, cache_mode: BuildCacheMode, root_dir: &Path) -> ExecutorChain {
    let chain = ExecutorChain::new()
        .with(ActionExecutor::new())
        .with(CommandExecutor::in_dir(root_dir));

    match cache_mode {
        BuildCacheMode::None => chain,
        BuildCacheMode::Memory => {
            chain.with_cache(BuildCacheController::new(Arc::new(MemoryBuildCache::new())))
        }
        BuildCacheMode::File => {
            let dir = root_dir.join(&cfg.config.cache_dir);
            debug!(dir = ?dir, "using file build cache");
            chain.with_cache(BuildCacheController::new(Arc::new(FileBuildCache::new(dir))))
        }
    }
}

/// Print the execution order without running anything.
fn print_dry_run(
    cfg: &ConfigFile,
    catalog: &UnitCatalog,
    requested: &[NodeId],
    filter: Option<NodeFilter>,
) -> Result<()> {
    let plan = ExecutionPlan::new();
    plan.add_to_plan(catalog, requested)?;
    plan.use_filter(filter)?;
    plan.populate()?;

    println!("rundag dry-run");
    println!("  config.workers = {}", cfg.config.workers);
    println!(
        "  config.continue_on_failure = {}",
        cfg.config.continue_on_failure
    );
    println!("  config.cache = {:?}", cfg.config.cache);
    println!();

    let nodes = plan.all_nodes()?;
    let filtered = plan.filtered_nodes()?;
    println!("execution order ({}):", nodes.len());
    for node in nodes {
        if filtered.contains(node.id()) {
            println!("  - {} (skipped: excluded)", node.id());
        } else {
            println!("  - {}", node.id());
        }
        if node.display_name() != node.id().as_str() {
            println!("      name: {}", node.display_name());
        }
        if let Some(task) = cfg.task.get(node.id().as_str()) {
            if let Some(cmd) = &task.cmd {
                println!("      cmd: {cmd}");
            }
        }
        if !node.dependencies().is_empty() {
            println!("      after: {:?}", node.dependencies());
        }
        if !node.locks().is_empty() {
            println!("      locks: {:?}", node.locks());
        }
        if let Some(key) = node.cache_key() {
            println!("      cache_key: {key}");
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!();
    for failure in &report.failures {
        println!("FAILED {failure}");
    }
    for failure in &report.listener_failures {
        println!("WARNING {failure}");
    }

    let status = if report.cancelled {
        "CANCELLED"
    } else if report.is_success() {
        "SUCCESSFUL"
    } else {
        "FAILED"
    };
    println!(
        "RUN {status} in {:.2?}: {} completed, {} failed, {} skipped",
        report.elapsed,
        report.count(NodeState::Completed),
        report.count(NodeState::Failed),
        report.count(NodeState::Skipped),
    );
}
