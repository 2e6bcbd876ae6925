// tests/coordinator.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use rundag::dag::{
    ExecutionPlan, NodeOutcome, NodeState, SkipReason, UnitCatalog, Work, WorkNode,
};
use rundag::engine::{ListenerBroadcaster, WorkerCoordinator};
use rundag::errors::RundagError;
use rundag::exec::{ActionExecutor, ExecFuture, ExecutorChain, NodeExecutor};
use rundag_test_utils::builders::{CatalogBuilder, UnitBuilder, ids};
use rundag_test_utils::fake_executor::RecordingExecutor;
use rundag_test_utils::{init_tracing, with_timeout};

async fn run(
    catalog: &UnitCatalog,
    requested: &[&str],
    chain: ExecutorChain,
    workers: usize,
    continue_on_failure: bool,
) -> (Arc<ExecutionPlan>, rundag::errors::Result<rundag::engine::RunReport>) {
    let plan = Arc::new(ExecutionPlan::new());
    plan.add_to_plan(catalog, &ids(requested)).unwrap();
    plan.set_continue_on_failure(continue_on_failure).unwrap();

    let coordinator = WorkerCoordinator::new(workers).unwrap();
    let result = with_timeout(coordinator.run(
        Arc::clone(&plan),
        Arc::new(chain),
        Arc::new(ListenerBroadcaster::new()),
    ))
    .await;
    (plan, result)
}

/// A fails, B depends on A, C is independent.
fn failing_chain() -> UnitCatalog {
    CatalogBuilder::new()
        .node("A", &[])
        .node("B", &["A"])
        .node("C", &[])
        .build()
}

#[test]
fn zero_workers_is_a_config_error() {
    assert!(matches!(
        WorkerCoordinator::new(0),
        Err(RundagError::ConfigError(_))
    ));
}

#[tokio::test]
async fn runs_every_node_in_dependency_order() {
    init_tracing();
    let catalog = CatalogBuilder::new()
        .node("A", &[])
        .node("B", &["A"])
        .node("C", &["A"])
        .node("D", &["B", "C"])
        .build();
    let executor = RecordingExecutor::new().with_delay(Duration::from_millis(5));

    let (_plan, result) = run(
        &catalog,
        &["D"],
        ExecutorChain::new().with(executor.clone()),
        4,
        false,
    )
    .await;
    let report = result.unwrap();

    assert!(report.is_success());
    assert_eq!(report.count(NodeState::Completed), 4);

    let records = executor.records();
    let finished = |id: &str| records.iter().find(|r| r.node == id).unwrap().finished;
    let started = |id: &str| records.iter().find(|r| r.node == id).unwrap().started;
    assert!(finished("A") <= started("B"));
    assert!(finished("A") <= started("C"));
    assert!(finished("B") <= started("D"));
    assert!(finished("C") <= started("D"));
}

#[tokio::test]
async fn continue_on_failure_reports_every_failure() {
    let executor = RecordingExecutor::new().failing(&["A"]);

    let (_plan, result) = run(
        &failing_chain(),
        &["B", "C"],
        ExecutorChain::new().with(executor.clone()),
        2,
        true,
    )
    .await;
    let report = result.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.states["A"], NodeState::Failed);
    assert_eq!(report.states["B"], NodeState::Skipped);
    assert_eq!(report.states["C"], NodeState::Completed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].node.as_str(), "A");
    assert!(!executor.was_executed("B"));
}

#[tokio::test]
async fn first_failure_stops_new_work_when_continue_is_off() {
    // One worker makes the order deterministic: A fails before C is claimed.
    let executor = RecordingExecutor::new().failing(&["A"]);

    let (plan, result) = run(
        &failing_chain(),
        &["B", "C"],
        ExecutorChain::new().with(executor.clone()),
        1,
        false,
    )
    .await;
    let report = result.unwrap();

    assert_eq!(executor.started(), vec!["A".to_string()]);
    assert_eq!(report.states["B"], NodeState::Skipped);
    assert_eq!(report.states["C"], NodeState::Skipped);
    assert_eq!(plan.skip_reason_of("B"), Some(SkipReason::DependencyFailed));
    assert_eq!(plan.skip_reason_of("C"), Some(SkipReason::Aborted));
    assert_eq!(report.failures.len(), 1);
}

#[tokio::test]
async fn unknown_work_type_is_fatal() {
    let catalog = CatalogBuilder::new()
        .with(UnitBuilder::new("shell").command("true"))
        .build();

    // Only in-process work is wired up.
    let (plan, result) = run(
        &catalog,
        &["shell"],
        ExecutorChain::new().with(ActionExecutor::new()),
        2,
        true,
    )
    .await;

    match result {
        Err(RundagError::UnknownWorkType { node }) => assert_eq!(node.as_str(), "shell"),
        other => panic!("expected unknown work type, got {other:?}"),
    }
    assert!(plan.is_aborted());

    // The claimed node is released, so nothing is left executing.
    assert_eq!(plan.state_of("shell"), Some(NodeState::Failed));
    let failure = plan.failure_of("shell").expect("abandoned node records a failure");
    assert!(failure.to_string().contains("execution abandoned"));
    plan.clear().unwrap();
}

/// Executor whose future panics instead of returning an outcome.
struct PanickingExecutor;

impl NodeExecutor for PanickingExecutor {
    fn name(&self) -> &str {
        "panicking"
    }

    fn accepts(&self, _node: &WorkNode) -> bool {
        true
    }

    #[allow(unreachable_code)]
    fn execute<'a>(&'a self, node: &'a WorkNode) -> ExecFuture<'a> {
        Box::pin(async move {
            panic!("executor crashed on {}", node.id());
            Ok(NodeOutcome::Completed)
        })
    }
}

#[tokio::test]
async fn crashed_worker_releases_its_node_and_locks() {
    init_tracing();
    let catalog = CatalogBuilder::new()
        .with(UnitBuilder::new("crash").lock("db"))
        .with(UnitBuilder::new("later").after("crash").lock("db"))
        .build();

    let (plan, result) = run(
        &catalog,
        &["later"],
        ExecutorChain::new().with(PanickingExecutor),
        2,
        false,
    )
    .await;

    assert!(matches!(result, Err(RundagError::Other(_))));
    assert_eq!(plan.state_of("crash"), Some(NodeState::Failed));
    assert_eq!(plan.state_of("later"), Some(NodeState::Skipped));
    assert_eq!(plan.collect_failures().len(), 1);
    plan.clear().unwrap();
}

#[tokio::test]
async fn actions_run_and_panics_fail_the_node() {
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let catalog = CatalogBuilder::new()
        .with(UnitBuilder::new("ok").action(move |_node: &WorkNode| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .with(UnitBuilder::new("err").action(|_node: &WorkNode| Err(anyhow!("bad input"))))
        .with(UnitBuilder::new("panics").action(|_node: &WorkNode| panic!("kaboom")))
        .node("aggregate", &["ok"])
        .build();

    let (_plan, result) = run(
        &catalog,
        &["aggregate", "err", "panics"],
        ExecutorChain::new().with(ActionExecutor::new()),
        3,
        true,
    )
    .await;
    let report = result.unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(report.states["aggregate"], NodeState::Completed);
    assert_eq!(report.states["err"], NodeState::Failed);
    assert_eq!(report.states["panics"], NodeState::Failed);

    let panic_failure = report
        .failures
        .iter()
        .find(|f| f.node.as_str() == "panics")
        .unwrap();
    assert!(panic_failure.to_string().contains("kaboom"));
}

/// Executor that blocks every node until released, to cancel mid-run.
struct GateExecutor {
    started: Arc<Mutex<Vec<String>>>,
    release: Arc<tokio::sync::Notify>,
}

impl NodeExecutor for GateExecutor {
    fn name(&self) -> &str {
        "gate"
    }

    fn accepts(&self, _node: &WorkNode) -> bool {
        true
    }

    fn execute<'a>(&'a self, node: &'a WorkNode) -> ExecFuture<'a> {
        Box::pin(async move {
            let released = self.release.notified();
            self.started.lock().unwrap().push(node.id().to_string());
            released.await;
            Ok(NodeOutcome::Completed)
        })
    }
}

#[tokio::test]
async fn cancellation_lets_running_nodes_finish_and_skips_the_rest() {
    init_tracing();
    let catalog = CatalogBuilder::new()
        .node("first", &[])
        .node("second", &["first"])
        .node("third", &["second"])
        .build();

    let started = Arc::new(Mutex::new(Vec::new()));
    let release = Arc::new(tokio::sync::Notify::new());
    let chain = ExecutorChain::new().with(GateExecutor {
        started: Arc::clone(&started),
        release: Arc::clone(&release),
    });

    let plan = Arc::new(ExecutionPlan::new());
    plan.add_to_plan(&catalog, &ids(&["third"])).unwrap();
    let coordinator = WorkerCoordinator::new(2).unwrap();
    let run_plan = Arc::clone(&plan);
    let handle = tokio::spawn(async move {
        coordinator
            .run(run_plan, Arc::new(chain), Arc::new(ListenerBroadcaster::new()))
            .await
    });

    with_timeout(async {
        while plan.state_of("first") != Some(NodeState::Executing) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;

    plan.cancel();
    // Release "first"; wait until it has actually entered the gate.
    with_timeout(async {
        while started.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    release.notify_waiters();

    let report = with_timeout(handle).await.unwrap().unwrap();
    assert!(report.cancelled);
    assert!(!report.is_success());
    assert_eq!(report.states["first"], NodeState::Completed);
    assert_eq!(plan.skip_reason_of("second"), Some(SkipReason::Cancelled));
    assert_eq!(plan.skip_reason_of("third"), Some(SkipReason::Cancelled));
    assert_eq!(*started.lock().unwrap(), vec!["first".to_string()]);
}

#[tokio::test]
async fn worker_count_bounds_parallelism() {
    let mut builder = CatalogBuilder::new();
    let names: Vec<String> = (0..8).map(|i| format!("n{i}")).collect();
    for name in &names {
        builder = builder.node(name, &[]);
    }
    let catalog = builder.build();
    let requested: Vec<&str> = names.iter().map(String::as_str).collect();

    let executor = RecordingExecutor::new().with_delay(Duration::from_millis(10));
    let (_plan, result) = run(
        &catalog,
        &requested,
        ExecutorChain::new().with(executor.clone()),
        2,
        false,
    )
    .await;
    assert!(result.unwrap().is_success());

    let records = executor.records();
    for record in &records {
        let concurrent = records
            .iter()
            .filter(|other| other.started <= record.started && record.started < other.finished)
            .count();
        assert!(concurrent <= 2, "{} overlapped {} executions", record.node, concurrent);
    }
}

#[test]
fn noop_work_is_accepted_by_the_action_executor() {
    let catalog = CatalogBuilder::new().node("lifecycle", &[]).build();
    let unit = catalog.get("lifecycle").unwrap();
    assert!(matches!(unit.work, Work::Noop));

    let plan = ExecutionPlan::new();
    plan.add_to_plan(&catalog, &ids(&["lifecycle"])).unwrap();
    let node = plan.all_nodes().unwrap().remove(0);
    assert!(ActionExecutor::new().accepts(&node));
}
