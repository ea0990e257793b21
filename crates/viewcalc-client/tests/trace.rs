mod common;

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use viewcalc_client::{SessionError, trace_dependencies};
use viewcalc_common::{TargetRef, Value, ValueProperties, ValueRequirement, ValueSpec};
use viewcalc_engine::test_view::{CONFIG, TestPortfolio, fair_value, present_value, sum_function};
use viewcalc_engine::{
    CompiledView, CycleEvaluator, CycleId, DependencyGraph, DependencyNode, InMemoryLiveData,
    LiveDataProvider, ViewDefinition,
};

use common::{attach, run_cycle, start};

fn prim(name: &str) -> ValueSpec {
    ValueSpec::new(name, TargetRef::primitive(name), ValueProperties::none())
}

/// `L0 <- N1 <- N2 <- ... <- Nk` where `L0` comes from live data.
fn chain(k: usize) -> (Arc<CompiledView>, InMemoryLiveData) {
    let f = sum_function("step");
    let mut graph = DependencyGraph::new(CONFIG);
    for i in 1..=k {
        graph.add_node(
            DependencyNode::new(f.clone(), TargetRef::primitive(format!("N{i}")))
                .with_input(prim(&format!("N{}", i - 1)))
                .with_output(prim(&format!("N{i}"))),
        );
    }
    let mut graphs = std::collections::BTreeMap::new();
    graphs.insert(CONFIG.to_string(), Arc::new(graph));
    let compiled = CompiledView::new(Arc::new(ViewDefinition::new("chain")), Utc::now(), graphs);

    let live = InMemoryLiveData::new();
    live.set_value(ValueRequirement::from(&prim("N0")), 2.0);
    (Arc::new(compiled), live)
}

#[test]
fn test_chain_trace_is_complete_and_ordered() {
    for k in 1..=5 {
        let (compiled, live) = chain(k);
        let snapshot = live.snapshot();
        let cycle = CycleEvaluator::new(&compiled, &snapshot).execute(CycleId(1), Utc::now());

        let rows = trace_dependencies(&cycle, CONFIG, &prim(&format!("N{k}"))).unwrap();
        assert_eq!(rows.len(), k + 1, "k producers plus the live input");
        assert_eq!(rows[0].parent_row_id, None);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.row_id, i);
            assert_eq!(row.indent, i);
            if let Some(parent) = row.parent_row_id {
                assert!(parent < row.row_id);
            }
        }
        let leaf = rows.last().unwrap();
        assert_eq!(leaf.function, "LiveData");
        assert_eq!(leaf.value, json!(2.0));
        assert_eq!(rows[0].value, json!(2.0));
        assert!(rows[..k].iter().all(|r| r.function == "step"));
    }
}

#[test]
fn test_unproduced_spec_has_no_trace() {
    let (compiled, live) = chain(2);
    let snapshot = live.snapshot();
    let cycle = CycleEvaluator::new(&compiled, &snapshot).execute(CycleId(1), Utc::now());
    assert!(trace_dependencies(&cycle, CONFIG, &prim("N0")).is_none());
    assert!(trace_dependencies(&cycle, CONFIG, &prim("elsewhere")).is_none());
    assert!(trace_dependencies(&cycle, "Other", &prim("N2")).is_none());
}

#[test]
fn test_trace_rows_serialize_camel_case() {
    let (compiled, live) = chain(1);
    let snapshot = live.snapshot();
    let cycle = CycleEvaluator::new(&compiled, &snapshot).execute(CycleId(1), Utc::now());
    let rows = trace_dependencies(&cycle, CONFIG, &prim("N1")).unwrap();
    assert_eq!(
        serde_json::to_value(&rows).unwrap(),
        json!([
            {
                "rowId": 0,
                "indent": 0,
                "targetType": "Prim",
                "target": "N1",
                "function": "step",
                "valueName": "N1",
                "properties": "{}",
                "value": 2.0,
            },
            {
                "rowId": 1,
                "parentRowId": 0,
                "indent": 1,
                "targetType": "Prim",
                "target": "N0",
                "function": "LiveData",
                "valueName": "N0",
                "properties": "{}",
                "value": 2.0,
            },
        ])
    );
}

#[test]
fn test_explain_through_session() {
    let portfolio = TestPortfolio::new();
    let process = start(&portfolio);
    let client = attach(&process);
    let root = present_value(TestPortfolio::root());

    assert!(matches!(
        client.explain(CONFIG, &root),
        Err(SessionError::CycleAccessDisabled)
    ));

    client.set_cycle_access_supported(true);
    let done = run_cycle(&process);
    let rows = client.explain(CONFIG, &root).unwrap().unwrap();
    // ROOT, P1, FV AAPL, Spot AAPL, P2, FV MSFT, Spot MSFT
    assert_eq!(rows.len(), 7);
    assert_eq!(rows[0].value, json!(1250.0));
    assert_eq!(rows[0].target_type, "Agg");
    let fv = rows
        .iter()
        .find(|r| r.value_name == "FairValue" && r.target == "AAPL")
        .unwrap();
    assert_eq!(fv.properties, fair_value("AAPL").properties().to_string());
    assert_eq!(
        process.lease_manager().lease_count(done.result.cycle_id()),
        0
    );
    assert_eq!(
        done.result.get(CONFIG, &root),
        Some(&Value::Number(1250.0))
    );
}

#[test]
fn test_shared_input_listed_under_each_consumer() {
    // D <- {B, C}, B <- S, C <- S, S <- L with L live.
    let f = sum_function("step");
    let mut graph = DependencyGraph::new(CONFIG);
    let nodes = [
        ("S", vec!["L"]),
        ("B", vec!["S"]),
        ("C", vec!["S"]),
        ("D", vec!["B", "C"]),
    ];
    for (name, inputs) in nodes {
        graph.add_node(
            DependencyNode::new(f.clone(), TargetRef::primitive(name))
                .with_inputs(inputs.iter().map(|i| prim(i)))
                .with_output(prim(name)),
        );
    }
    let mut graphs = std::collections::BTreeMap::new();
    graphs.insert(CONFIG.to_string(), Arc::new(graph));
    let compiled = Arc::new(CompiledView::new(
        Arc::new(ViewDefinition::new("diamond")),
        Utc::now(),
        graphs,
    ));
    let live = InMemoryLiveData::new();
    live.set_value(ValueRequirement::from(&prim("L")), 1.0);
    let snapshot = live.snapshot();
    let cycle = CycleEvaluator::new(&compiled, &snapshot).execute(CycleId(1), Utc::now());

    let rows = trace_dependencies(&cycle, CONFIG, &prim("D")).unwrap();
    let shape: Vec<(&str, Option<usize>)> = rows
        .iter()
        .map(|r| (r.value_name.as_str(), r.parent_row_id))
        .collect();
    assert_eq!(
        shape,
        vec![
            ("D", None),
            ("B", Some(0)),
            ("S", Some(1)),
            ("L", Some(2)),
            ("C", Some(0)),
            ("S", Some(4)),
        ]
    );
    // The second S row is an edge only; its inputs were expanded above
    assert_eq!(rows[5].indent, 2);
    assert_eq!(rows[5].function, "step");
    assert_eq!(rows[5].value, json!(1.0));
    assert_eq!(rows[0].value, json!(2.0));
}

#[test]
fn test_deep_chain_trace() {
    const DEPTH: usize = 20_000;
    let f = sum_function("step");
    let mut graph = DependencyGraph::new(CONFIG);
    for i in (1..=DEPTH).rev() {
        graph.add_node(
            DependencyNode::new(f.clone(), TargetRef::primitive(format!("N{i}")))
                .with_input(prim(&format!("N{}", i - 1)))
                .with_output(prim(&format!("N{i}"))),
        );
    }
    let mut graphs = std::collections::BTreeMap::new();
    graphs.insert(CONFIG.to_string(), Arc::new(graph));
    let compiled = Arc::new(CompiledView::new(
        Arc::new(ViewDefinition::new("chain")),
        Utc::now(),
        graphs,
    ));

    let rows = std::thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(move || {
            let live = InMemoryLiveData::new();
            live.set_value(ValueRequirement::from(&prim("N0")), 1.0);
            let snapshot = live.snapshot();
            let cycle =
                CycleEvaluator::new(&compiled, &snapshot).execute(CycleId(1), Utc::now());
            trace_dependencies(&cycle, CONFIG, &prim(&format!("N{DEPTH}")))
        })
        .unwrap()
        .join()
        .unwrap()
        .unwrap();

    assert_eq!(rows.len(), DEPTH + 1);
    assert_eq!(rows[DEPTH].indent, DEPTH);
    assert_eq!(rows[DEPTH].function, "LiveData");
    assert_eq!(rows[DEPTH].value, json!(1.0));
}
