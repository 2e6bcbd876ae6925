// tests/execution_graph.rs

use std::sync::Arc;

use rundag::dag::{GraphState, NodeFilter, NodeState, WorkNode};
use rundag::engine::ExecutionGraph;
use rundag::errors::RundagError;
use rundag::exec::{ActionExecutor, ExecutorChain};
use rundag_test_utils::builders::{CatalogBuilder, UnitBuilder, ids};
use rundag_test_utils::fake_executor::RecordingExecutor;
use rundag_test_utils::{init_tracing, with_timeout};

fn graph_with(executor: &RecordingExecutor, workers: usize) -> ExecutionGraph {
    ExecutionGraph::new(ExecutorChain::new().with(executor.clone()), workers).unwrap()
}

#[test]
fn zero_workers_is_rejected() {
    let executor = RecordingExecutor::new();
    assert!(matches!(
        ExecutionGraph::new(ExecutorChain::new().with(executor), 0),
        Err(RundagError::ConfigError(_))
    ));
}

#[test]
fn queries_on_an_empty_graph_are_illegal() {
    let graph = graph_with(&RecordingExecutor::new(), 1);

    assert_eq!(graph.graph_state(), GraphState::Empty);
    assert!(matches!(graph.has_node("A"), Err(RundagError::IllegalState(_))));
    assert!(matches!(graph.all_nodes(), Err(RundagError::IllegalState(_))));
    assert!(matches!(graph.populate(), Err(RundagError::IllegalState(_))));
}

#[test]
fn queries_describe_the_added_work() {
    let catalog = CatalogBuilder::new()
        .with(UnitBuilder::new(":lib:compile").name("Compile lib"))
        .with(UnitBuilder::new(":app:compile").after(":lib:compile"))
        .build();
    let graph = graph_with(&RecordingExecutor::new(), 1);
    graph.add_units(&catalog, &ids(&[":app:compile"])).unwrap();

    assert_eq!(graph.size(), 2);
    assert!(graph.has_node(":lib:compile").unwrap());
    assert!(graph.has_node_named("Compile lib").unwrap());
    assert!(!graph.has_node_named(":lib:build").unwrap());
    assert_eq!(
        graph.dependencies_of(":app:compile").unwrap(),
        ids(&[":lib:compile"])
    );
    assert!(matches!(
        graph.dependencies_of(":nope"),
        Err(RundagError::UnknownNode(_))
    ));
    assert_eq!(graph.requested_nodes(), ids(&[":app:compile"]));
    assert!(graph.filtered_nodes().unwrap().is_empty());

    let order: Vec<String> = graph
        .all_nodes()
        .unwrap()
        .iter()
        .map(|n| n.id().to_string())
        .collect();
    assert_eq!(order, vec![":lib:compile", ":app:compile"]);
}

#[tokio::test]
async fn execute_runs_the_plan_and_clears_it() {
    init_tracing();
    let catalog = CatalogBuilder::new()
        .node("A", &[])
        .node("B", &["A"])
        .build();
    let executor = RecordingExecutor::new();
    let graph = graph_with(&executor, 2);
    graph.add_units(&catalog, &ids(&["B"])).unwrap();

    let report = with_timeout(graph.execute()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(executor.started(), vec!["A".to_string(), "B".to_string()]);
    assert_eq!(graph.graph_state(), GraphState::Empty);
    assert_eq!(graph.size(), 0);

    // Reusable for a second round of work.
    graph.add_units(&catalog, &ids(&["A"])).unwrap();
    let report = with_timeout(graph.execute()).await.unwrap();
    assert_eq!(report.states.len(), 1);
}

#[tokio::test]
async fn filter_skips_excluded_nodes() {
    let catalog = CatalogBuilder::new()
        .node("lint", &[])
        .node("compile", &[])
        .node("check", &["lint", "compile"])
        .build();
    let executor = RecordingExecutor::new();
    let graph = graph_with(&executor, 2);
    graph.add_units(&catalog, &ids(&["check"])).unwrap();

    let filter: NodeFilter = Arc::new(|node: &WorkNode| node.id().as_str() != "lint");
    graph.use_filter(Some(filter)).unwrap();
    assert_eq!(
        graph.filtered_nodes().unwrap().into_iter().collect::<Vec<_>>(),
        ids(&["lint"])
    );

    let report = with_timeout(graph.execute()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.states["lint"], NodeState::Skipped);
    assert_eq!(report.states["check"], NodeState::Completed);
    assert!(!executor.was_executed("lint"));
}

#[tokio::test]
async fn executing_an_empty_graph_fails() {
    let graph = graph_with(&RecordingExecutor::new(), 1);
    assert!(matches!(
        with_timeout(graph.execute()).await,
        Err(RundagError::IllegalState(_))
    ));
}

#[tokio::test]
async fn cancel_before_execute_skips_everything() {
    let catalog = CatalogBuilder::new().node("A", &[]).node("B", &[]).build();
    let executor = RecordingExecutor::new();
    let graph = graph_with(&executor, 2);
    graph.add_units(&catalog, &ids(&["A", "B"])).unwrap();

    graph.cancel();
    let report = with_timeout(graph.execute()).await.unwrap();

    assert!(report.cancelled);
    assert!(executor.started().is_empty());
    assert_eq!(report.count(NodeState::Skipped), 2);
}

#[tokio::test]
async fn graph_is_reusable_after_a_fatal_run() {
    init_tracing();
    let catalog = CatalogBuilder::new()
        .with(UnitBuilder::new("shell").command("true"))
        .node("noop", &[])
        .build();
    let graph = ExecutionGraph::new(ExecutorChain::new().with(ActionExecutor::new()), 2).unwrap();
    graph.add_units(&catalog, &ids(&["shell"])).unwrap();

    assert!(matches!(
        with_timeout(graph.execute()).await,
        Err(RundagError::UnknownWorkType { .. })
    ));
    assert_eq!(graph.graph_state(), GraphState::Empty);

    graph.add_units(&catalog, &ids(&["noop"])).unwrap();
    let report = with_timeout(graph.execute()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.states["noop"], NodeState::Completed);
}
