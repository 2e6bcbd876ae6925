// tests/lock_exclusivity.rs

use std::sync::Arc;
use std::time::Duration;

use rundag::dag::ExecutionPlan;
use rundag::engine::{ListenerBroadcaster, WorkerCoordinator};
use rundag::exec::ExecutorChain;
use rundag_test_utils::builders::{CatalogBuilder, UnitBuilder, ids};
use rundag_test_utils::fake_executor::{RecordingExecutor, overlapping_lock_holders};
use rundag_test_utils::{init_tracing, with_timeout};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nodes_sharing_a_lock_never_overlap() {
    init_tracing();

    let locks = ["project:app", "project:lib", "shared-db"];
    let mut builder = CatalogBuilder::new();
    let mut names = Vec::new();
    for i in 0..40 {
        let name = format!("task{i}");
        let mut unit = UnitBuilder::new(&name).lock(locks[i % locks.len()]);
        if i % 5 == 0 {
            // Some nodes need two locks at once.
            unit = unit.lock(locks[(i + 1) % locks.len()]);
        }
        if i >= 10 && i % 3 == 0 {
            unit = unit.after(&format!("task{}", i - 7));
        }
        builder = builder.with(unit);
        names.push(name);
    }
    let catalog = builder.build();
    let requested: Vec<&str> = names.iter().map(String::as_str).collect();

    let executor = RecordingExecutor::new().with_delay(Duration::from_millis(2));
    let plan = Arc::new(ExecutionPlan::new());
    plan.add_to_plan(&catalog, &ids(&requested)).unwrap();

    let report = with_timeout(WorkerCoordinator::new(8).unwrap().run(
        Arc::clone(&plan),
        Arc::new(ExecutorChain::new().with(executor.clone())),
        Arc::new(ListenerBroadcaster::new()),
    ))
    .await
    .unwrap();

    assert!(report.is_success());
    let records = executor.records();
    assert_eq!(records.len(), 40);

    let overlaps = overlapping_lock_holders(&records);
    assert!(overlaps.is_empty(), "overlapping lock holders: {overlaps:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unlocked_nodes_do_run_in_parallel() {
    let mut builder = CatalogBuilder::new();
    for i in 0..4 {
        builder = builder.node(&format!("free{i}"), &[]);
    }
    let catalog = builder.build();

    let executor = RecordingExecutor::new().with_delay(Duration::from_millis(50));
    let plan = Arc::new(ExecutionPlan::new());
    plan.add_to_plan(&catalog, &ids(&["free0", "free1", "free2", "free3"]))
        .unwrap();

    with_timeout(WorkerCoordinator::new(4).unwrap().run(
        plan,
        Arc::new(ExecutorChain::new().with(executor.clone())),
        Arc::new(ListenerBroadcaster::new()),
    ))
    .await
    .unwrap();

    let records = executor.records();
    let any_overlap = records
        .iter()
        .enumerate()
        .any(|(i, a)| records[i + 1..].iter().any(|b| a.overlaps(b)));
    assert!(any_overlap, "independent nodes should execute concurrently");
}
