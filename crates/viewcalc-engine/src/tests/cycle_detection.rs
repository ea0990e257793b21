//! Tests for cycle detection using the Scheduler.
use chrono::Utc;
use viewcalc_common::{NotCalculated, Value};

use crate::cycle::{CycleEvaluator, CycleId};
use crate::graph::{DependencyGraph, NodeId};
use crate::live_data::LiveDataSnapshot;
use crate::scheduler::Scheduler;
use crate::test_view;

use super::common::{compiled_single, node, prim};

#[test]
fn test_two_node_cycle_detection() {
    let f = test_view::sum_function("sum");
    let mut graph = DependencyGraph::new("Default");
    graph.add_node(node(&f, "A", &["B"]));
    graph.add_node(node(&f, "B", &["A"]));

    let schedule = Scheduler::new(&graph).create_schedule();
    assert_eq!(schedule.cycles.len(), 1);
    assert_eq!(schedule.cycles[0].len(), 2);
    assert!(schedule.layers.is_empty());
}

#[test]
fn test_self_loop_is_a_cycle() {
    let f = test_view::sum_function("sum");
    let mut graph = DependencyGraph::new("Default");
    graph.add_node(node(&f, "A", &["A"]));

    let schedule = Scheduler::new(&graph).create_schedule();
    assert_eq!(schedule.cycles, vec![vec![NodeId(0)]]);
}

#[test]
fn test_cycle_with_acyclic_branch() {
    let f = test_view::sum_function("sum");
    let mut graph = DependencyGraph::new("Default");
    graph.add_node(node(&f, "A", &["B"]));
    graph.add_node(node(&f, "B", &["A"]));
    graph.add_node(node(&f, "C", &["X"]));
    graph.add_node(node(&f, "D", &["C"]));

    let schedule = Scheduler::new(&graph).create_schedule();
    assert_eq!(schedule.cycles.len(), 1);
    assert_eq!(schedule.layers.len(), 2);
    assert_eq!(schedule.node_count(), 4);
}

#[test]
fn test_cycle_members_marked_and_dependents_missing_inputs() {
    let f = test_view::sum_function("sum");
    let mut graph = DependencyGraph::new("Default");
    graph.add_node(node(&f, "A", &["B"]));
    graph.add_node(node(&f, "B", &["A"]));
    graph.add_node(node(&f, "C", &["A"]));
    graph.add_node(node(&f, "D", &[]));

    let compiled = compiled_single(graph);
    let snapshot = LiveDataSnapshot::default();
    let cycle = CycleEvaluator::new(&compiled, &snapshot).execute(CycleId(1), Utc::now());
    let cache = cycle.cache();

    let eval_error = Value::NotCalculated(NotCalculated::EvaluationError);
    assert_eq!(cache.get("Default", &prim("A")), Some(&eval_error));
    assert_eq!(cache.get("Default", &prim("B")), Some(&eval_error));
    assert_eq!(
        cache.get("Default", &prim("C")),
        Some(&Value::NotCalculated(NotCalculated::MissingInputs))
    );
    // A node with no inputs sums to zero
    assert_eq!(cache.get("Default", &prim("D")), Some(&Value::Number(0.0)));
}

#[test]
fn test_deep_chain_inserted_consumer_first() {
    const DEPTH: usize = 20_000;
    let f = test_view::sum_function("sum");
    let mut graph = DependencyGraph::new("Default");
    for i in (1..=DEPTH).rev() {
        let input = format!("N{}", i - 1);
        graph.add_node(node(&f, &format!("N{i}"), &[input.as_str()]));
    }
    graph.add_node(node(&f, "N0", &[]));

    let schedule = Scheduler::new(&graph).create_schedule();
    assert!(schedule.cycles.is_empty());
    assert_eq!(schedule.layers.len(), DEPTH + 1);

    // A small stack must still be enough for scheduling and evaluation
    let compiled = compiled_single(graph);
    let top = prim(&format!("N{DEPTH}"));
    let value = std::thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(move || {
            let snapshot = LiveDataSnapshot::default();
            let cycle = CycleEvaluator::new(&compiled, &snapshot).execute(CycleId(1), Utc::now());
            cycle.cache().get("Default", &top).cloned()
        })
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(value, Some(Value::Number(0.0)));
}
