//! Property tests over randomly generated acyclic graphs.
use proptest::prelude::*;
use rustc_hash::FxHashSet;

use crate::graph::{DependencyGraph, DependencyGraphExplorer, NodeId};
use crate::scheduler::Scheduler;
use crate::test_view;

use super::common::{node, prim};

/// Node `i` may only read outputs of nodes `< i`, so the graph is acyclic.
fn dag_strategy() -> impl Strategy<Value = Vec<Vec<prop::sample::Index>>> {
    prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), 1..30)
}

fn build(shape: &[Vec<prop::sample::Index>]) -> DependencyGraph {
    let f = test_view::sum_function("sum");
    let mut graph = DependencyGraph::new("Default");
    for (i, picks) in shape.iter().enumerate() {
        let name = format!("N{i}");
        let inputs: Vec<String> = if i == 0 {
            vec!["LIVE".to_string()]
        } else {
            picks.iter().map(|p| format!("N{}", p.index(i))).collect()
        };
        let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        graph.add_node(node(&f, &name, &refs));
    }
    graph
}

fn reachable(graph: &DependencyGraph, from: NodeId) -> FxHashSet<NodeId> {
    let mut seen = FxHashSet::default();
    let mut stack = vec![from];
    while let Some(id) = stack.pop() {
        if seen.insert(id) {
            stack.extend(graph.dependencies_of(id));
        }
    }
    seen
}

proptest! {
    #[test]
    fn layers_respect_dependencies(shape in dag_strategy()) {
        let graph = build(&shape);
        let schedule = Scheduler::new(&graph).create_schedule();

        prop_assert!(schedule.cycles.is_empty());
        prop_assert_eq!(schedule.node_count(), graph.len());

        let mut layer_of = vec![usize::MAX; graph.len()];
        for (depth, layer) in schedule.layers.iter().enumerate() {
            for id in &layer.nodes {
                layer_of[id.as_index()] = depth;
            }
        }
        for id in graph.node_ids() {
            for dep in graph.dependencies_of(id) {
                prop_assert!(layer_of[dep.as_index()] < layer_of[id.as_index()]);
            }
        }
    }

    #[test]
    fn subgraph_is_exactly_the_reachable_set(
        shape in dag_strategy(),
        pick in any::<prop::sample::Index>(),
    ) {
        let graph = build(&shape);
        let target = NodeId(pick.index(graph.len()) as u32);
        let spec = prim(&format!("N{}", target.0));

        let sub = graph.subgraph_producing(&spec).unwrap();
        let expected = reachable(&graph, target);
        prop_assert_eq!(sub.len(), expected.len());
        for id in expected {
            let node = graph.node(id).unwrap();
            for output in node.outputs() {
                prop_assert!(sub.node_producing(output).is_some());
            }
        }
    }
}
