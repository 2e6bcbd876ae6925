// tests/property_plan.rs

use std::collections::BTreeSet;

use anyhow::anyhow;
use proptest::prelude::*;
use rundag::dag::{
    ExecutionPlan, NodeFailure, NodeOutcome, NodeState, Selection, SkipReason, UnitCatalog,
    WorkNode,
};
use rundag_test_utils::builders::{CatalogBuilder, UnitBuilder, ids};

#[derive(Debug, Clone)]
struct NodeSpec {
    deps: BTreeSet<usize>,
    lock: Option<usize>,
    fails: bool,
}

// Acyclic by construction: node N may only depend on nodes 0..N-1.
fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = Vec<NodeSpec>> {
    (1..=max_nodes).prop_flat_map(|n| {
        proptest::collection::vec(
            (
                proptest::collection::vec(any::<usize>(), 0..4),
                proptest::option::of(0..3usize),
                proptest::bool::weighted(0.2),
            ),
            n,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, (deps, lock, fails))| NodeSpec {
                    deps: if i == 0 {
                        BTreeSet::new()
                    } else {
                        deps.into_iter().map(|d| d % i).collect()
                    },
                    lock,
                    fails,
                })
                .collect()
        })
    })
}

fn catalog_for(specs: &[NodeSpec]) -> UnitCatalog {
    let mut builder = CatalogBuilder::new();
    for (i, spec) in specs.iter().enumerate() {
        let mut unit = UnitBuilder::new(&format!("n{i}"));
        for dep in &spec.deps {
            unit = unit.after(&format!("n{dep}"));
        }
        if let Some(lock) = spec.lock {
            unit = unit.lock(&format!("lock{lock}"));
        }
        builder = builder.with(unit);
    }
    builder.build()
}

fn index_of(node: &WorkNode) -> usize {
    node.id()[1..].parse().unwrap()
}

proptest! {
    #[test]
    fn nodes_are_only_handed_out_once_dependencies_are_done(
        specs in dag_strategy(12),
        workers in 1..4usize,
        continue_on_failure in any::<bool>(),
        choices in proptest::collection::vec(any::<usize>(), 1..16),
    ) {
        let catalog = catalog_for(&specs);
        let names: Vec<String> = (0..specs.len()).map(|i| format!("n{i}")).collect();
        let requested: Vec<&str> = names.iter().map(String::as_str).collect();

        let plan = ExecutionPlan::new();
        plan.add_to_plan(&catalog, &ids(&requested)).unwrap();
        plan.set_continue_on_failure(continue_on_failure).unwrap();

        let mut executing: Vec<WorkNode> = Vec::new();
        let mut executed_failing = BTreeSet::new();
        let mut step = 0usize;

        loop {
            step += 1;
            prop_assert!(step < 1_000, "plan did not terminate");

            while executing.len() < workers {
                match plan.select_next().unwrap() {
                    Selection::Node(node) => {
                        for dep in node.dependencies() {
                            prop_assert_eq!(plan.state_of(dep), Some(NodeState::Completed));
                        }
                        for other in &executing {
                            prop_assert!(other.locks().is_disjoint(node.locks()));
                        }
                        executing.push(node);
                    }
                    Selection::NoneReady => {
                        prop_assert!(!executing.is_empty());
                        break;
                    }
                    Selection::Finished => break,
                }
            }

            if executing.is_empty() {
                break;
            }

            let pick = choices[step % choices.len()] % executing.len();
            let node = executing.remove(pick);
            let i = index_of(&node);
            let outcome = if specs[i].fails {
                executed_failing.insert(i);
                NodeOutcome::Failed(NodeFailure::new(&node, anyhow!("n{i} failed")))
            } else {
                NodeOutcome::Completed
            };
            plan.node_finished(node.id(), outcome).unwrap();
        }

        prop_assert!(plan.is_finished());
        for (id, state) in plan.states() {
            prop_assert!(state.is_terminal(), "{} ended in {:?}", id, state);
        }

        let failed: BTreeSet<usize> = plan
            .collect_failures()
            .iter()
            .map(|f| f.node[1..].parse().unwrap())
            .collect();
        prop_assert_eq!(&failed, &executed_failing);

        if continue_on_failure {
            // Every node whose dependencies all completed got to run.
            for (i, spec) in specs.iter().enumerate() {
                let deps_ok = spec
                    .deps
                    .iter()
                    .all(|d| plan.state_of(&format!("n{d}")) == Some(NodeState::Completed));
                let state = plan.state_of(&format!("n{i}"));
                if deps_ok {
                    let expected = if spec.fails { NodeState::Failed } else { NodeState::Completed };
                    prop_assert_eq!(state, Some(expected));
                } else {
                    prop_assert_eq!(
                        plan.skip_reason_of(&format!("n{i}")),
                        Some(SkipReason::DependencyFailed)
                    );
                }
            }
        } else {
            prop_assert!(failed.len() <= workers);
        }
    }
}
