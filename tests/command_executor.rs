// tests/command_executor.rs
#![cfg(unix)]

use rundag::dag::{NodeOutcome, UnitCatalog, WorkNode};
use rundag::exec::{CommandExecutor, NodeExecutor};
use rundag_test_utils::builders::{CatalogBuilder, UnitBuilder, ids};
use rundag_test_utils::with_timeout;

fn command_node(cmd: &str) -> WorkNode {
    let catalog: UnitCatalog = CatalogBuilder::new()
        .with(UnitBuilder::new("cmd").command(cmd))
        .build();
    let plan = rundag::dag::GraphBuilder::new(&catalog)
        .build_plan(&ids(&["cmd"]))
        .unwrap();
    plan.all_nodes().unwrap().remove(0)
}

#[tokio::test]
async fn successful_command_completes() {
    let node = command_node("echo hello && echo oops >&2");
    let executor = CommandExecutor::new();
    assert!(executor.accepts(&node));

    let outcome = with_timeout(executor.execute(&node)).await.unwrap();
    assert!(matches!(outcome, NodeOutcome::Completed));
}

#[tokio::test]
async fn non_zero_exit_fails_the_node() {
    let node = command_node("exit 3");
    let outcome = with_timeout(CommandExecutor::new().execute(&node))
        .await
        .unwrap();

    match outcome {
        NodeOutcome::Failed(failure) => {
            assert_eq!(failure.node.as_str(), "cmd");
            assert!(failure.to_string().contains("exited with code 3"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn commands_run_in_the_configured_directory() {
    let dir = tempfile::tempdir().unwrap();
    let node = command_node("touch marker");

    let outcome = with_timeout(CommandExecutor::in_dir(dir.path()).execute(&node))
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert!(dir.path().join("marker").exists());
}

#[test]
fn only_command_nodes_are_accepted() {
    let catalog = CatalogBuilder::new().node("noop", &[]).build();
    let plan = rundag::dag::GraphBuilder::new(&catalog)
        .build_plan(&ids(&["noop"]))
        .unwrap();
    let node = plan.all_nodes().unwrap().remove(0);
    assert!(!CommandExecutor::new().accepts(&node));
}
