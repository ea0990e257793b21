mod common;

use std::sync::Arc;

use serde_json::{Value as JsonValue, json};
use viewcalc_client::{
    CellId, ConversionMode, GridConfig, GridType, RecordingChannel, RowTree, ViewGrid, Viewport,
};
use viewcalc_common::{NotCalculated, TargetRef, Value};
use viewcalc_engine::test_view::{CONFIG, TestPortfolio, present_value};

use common::{attach, pv_model, run_cycle, start, wait_until};

const ROOT_ROW: u64 = 0;
const P1_ROW: u64 = 1;
const P2_ROW: u64 = 2;
const PV_COL: u64 = 0;

struct Fixture {
    portfolio: TestPortfolio,
    channel: Arc<RecordingChannel>,
    grid: Arc<ViewGrid>,
}

fn fixture() -> Fixture {
    let portfolio = TestPortfolio::new();
    let process = start(&portfolio);
    let client = Arc::new(attach(&process));
    let channel = Arc::new(RecordingChannel::new());
    let grid = Arc::new(ViewGrid::new(
        "portfolio",
        GridType::Portfolio,
        &portfolio.definition,
        client,
        channel.clone(),
        GridConfig::default(),
    ));
    Fixture {
        portfolio,
        channel,
        grid,
    }
}

fn viewport(rows: &[u64]) -> Viewport {
    rows.iter().map(|r| (*r, None)).collect()
}

fn pos(id: &str) -> TargetRef {
    TargetRef::position(id)
}

#[test]
fn test_structure_from_definition() {
    let f = fixture();
    let structure = f.grid.grid_structure();
    assert_eq!(structure["name"], json!("portfolio"));
    assert_eq!(
        structure["rows"],
        json!([
            { "rowId": 0, "targetType": "Agg", "target": "ROOT" },
            { "rowId": 1, "targetType": "Pos", "target": "P1" },
            { "rowId": 2, "targetType": "Pos", "target": "P2" },
        ])
    );
    assert_eq!(
        structure["columns"],
        json!([{
            "colId": 0,
            "header": "PV",
            "description": "PV/Default",
            "nullValue": null,
        }])
    );
    assert!(structure.get("portfolio").is_none());
}

#[test]
fn test_row_tree_in_structure() {
    let f = fixture();
    let grid = ViewGrid::new(
        "tree",
        GridType::Portfolio,
        &f.portfolio.definition,
        f.grid_client(),
        f.channel.clone(),
        GridConfig::default(),
    )
    .with_row_tree(RowTree::node(0, vec![RowTree::leaf(1), RowTree::leaf(2)]));
    assert_eq!(grid.grid_structure()["portfolio"], json!([0, 2, [[1, 1, []], [2, 2, []]]]));
}

impl Fixture {
    fn grid_client(&self) -> Arc<viewcalc_client::ViewClient> {
        Arc::new(attach(&start(&self.portfolio)))
    }

    fn updates(&self) -> Vec<JsonValue> {
        self.channel.on_topic(&self.grid.updates_topic())
    }

    fn column_details(&self) -> Vec<JsonValue> {
        self.channel.on_topic(&self.grid.columns_topic())
    }
}

#[test]
fn test_only_viewport_rows_are_delivered() {
    let f = fixture();
    f.grid.set_viewport(viewport(&[P1_ROW]));

    let model = pv_model(
        1,
        1_000,
        &[
            (TestPortfolio::root(), Value::Number(1250.0)),
            (pos("P1"), Value::Number(1000.0)),
            (pos("P2"), Value::Number(250.0)),
        ],
    );
    f.grid.process_result(&model);

    let updates = f.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["rowId"], json!(P1_ROW));
    // History column: the cell carries its display value plus history.
    assert_eq!(updates[0]["0"]["display"], json!(1000.0));

    f.grid.set_viewport(Viewport::new());
    f.grid.process_result(&pv_model(2, 2_000, &[(pos("P1"), Value::Number(1.0))]));
    assert_eq!(f.updates().len(), 1);
}

#[test]
fn test_column_type_announced_once() {
    let f = fixture();
    f.grid.set_viewport(viewport(&[ROOT_ROW, P1_ROW, P2_ROW]));

    let sentinel = Value::NotCalculated(NotCalculated::MissingInputs);
    f.grid
        .process_result(&pv_model(1, 1_000, &[(pos("P1"), sentinel.clone())]));
    assert!(f.column_details().is_empty());
    assert!(!f.grid.is_history_column(PV_COL));
    assert_eq!(f.updates()[0]["0"], json!("Missing inputs"));

    f.grid.process_result(&pv_model(
        2,
        2_000,
        &[(pos("P1"), Value::Number(1.0)), (pos("P2"), Value::Number(2.0))],
    ));
    f.grid
        .process_result(&pv_model(3, 3_000, &[(pos("P1"), Value::Number(3.0))]));

    let details = f.column_details();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0]["colId"], json!(PV_COL));
    assert_eq!(details[0]["dataType"], json!("DOUBLE"));
    assert!(f.grid.is_history_column(PV_COL));
    assert_eq!(f.grid.grid_structure()["columns"][0]["dataType"], json!("DOUBLE"));
}

#[test]
fn test_history_newer_than_viewport_timestamp() {
    let f = fixture();
    f.grid.set_viewport(viewport(&[P1_ROW]));
    for (cycle, millis, value) in [(1, 1_000, 1.0), (2, 2_000, 2.0), (3, 3_000, 3.0)] {
        f.grid
            .process_result(&pv_model(cycle, millis, &[(pos("P1"), Value::Number(value))]));
    }
    let last = f.updates().pop().unwrap();
    assert_eq!(last["0"]["display"], json!(3.0));
    assert_eq!(last["0"]["history"], json!([1.0, 2.0, 3.0]));

    let mut seen = Viewport::new();
    seen.insert(P1_ROW, Some(2_000));
    f.grid.set_viewport(seen);
    f.grid
        .process_result(&pv_model(4, 4_000, &[(pos("P1"), Value::Number(4.0))]));
    let last = f.updates().pop().unwrap();
    assert_eq!(last["0"]["history"], json!([3.0, 4.0]));
}

#[test]
fn test_history_kept_for_rows_outside_viewport() {
    let f = fixture();
    f.grid
        .process_result(&pv_model(1, 1_000, &[(pos("P2"), Value::Number(1.0))]));
    f.grid
        .process_result(&pv_model(2, 2_000, &[(pos("P2"), Value::Number(2.0))]));
    assert!(f.updates().is_empty());

    f.grid.set_viewport(viewport(&[P2_ROW]));
    f.grid
        .process_result(&pv_model(3, 3_000, &[(pos("P2"), Value::Number(3.0))]));
    assert_eq!(f.updates()[0]["0"]["history"], json!([1.0, 2.0, 3.0]));
}

#[test]
fn test_conversion_failure_marks_only_that_cell() {
    let f = fixture();
    f.grid.set_viewport(viewport(&[ROOT_ROW, P1_ROW, P2_ROW]));
    f.grid.process_result(&pv_model(
        1,
        1_000,
        &[
            (pos("P1"), Value::Number(f64::NAN)),
            (pos("P2"), Value::Number(250.0)),
        ],
    ));

    let updates = f.updates();
    let by_row = |row: u64| {
        updates
            .iter()
            .find(|u| u["rowId"] == json!(row))
            .cloned()
            .unwrap()
    };
    assert_eq!(by_row(P1_ROW)["0"]["display"], json!("Conversion Error"));
    assert_eq!(by_row(P2_ROW)["0"]["display"], json!(250.0));
}

#[test]
fn test_full_mode_is_per_cell() {
    let f = fixture();
    f.grid.set_viewport(viewport(&[P1_ROW, P2_ROW]));
    let p1 = CellId::new(P1_ROW, PV_COL);
    f.grid.set_conversion_mode(p1, ConversionMode::Full);
    assert_eq!(f.grid.conversion_mode(p1), ConversionMode::Full);
    assert_eq!(
        f.grid.conversion_mode(CellId::new(P2_ROW, PV_COL)),
        ConversionMode::Summary
    );
    f.grid.set_conversion_mode(p1, ConversionMode::Summary);
    assert_eq!(f.grid.conversion_mode(p1), ConversionMode::Summary);
}

#[test]
fn test_explain_toggles_cycle_access() {
    let f = fixture();
    let client = f.grid_client();
    let grid = Arc::new(ViewGrid::new(
        "explained",
        GridType::Portfolio,
        &f.portfolio.definition,
        client.clone(),
        f.channel.clone(),
        GridConfig::default(),
    ));
    grid.attach();
    client.start_live().unwrap();
    grid.set_viewport(viewport(&[P1_ROW]));

    let p1 = CellId::new(P1_ROW, PV_COL);
    let p2 = CellId::new(P2_ROW, PV_COL);
    grid.set_explain(p1, true);
    grid.set_explain(p2, true);
    assert!(client.is_cycle_access_supported());
    assert!(client.process().cycle_access_enabled());

    run_cycle(client.process());
    let topic = grid.updates_topic();
    assert!(wait_until(|| !f.channel.on_topic(&topic).is_empty()));
    let update = f.channel.on_topic(&topic)[0].clone();
    assert_eq!(update["0"]["display"], json!(1000.0));
    let explain = update["0"]["explain"].as_array().cloned().unwrap();
    assert_eq!(explain[0]["function"], json!("present_value"));
    assert_eq!(explain[0]["valueName"], json!("PV"));
    assert!(explain[0].get("parentRowId").is_none());
    assert!(
        explain
            .iter()
            .any(|row| row["function"] == json!("LiveData") && row["target"] == json!("AAPL"))
    );

    grid.set_explain(p1, false);
    assert!(client.is_cycle_access_supported());
    grid.set_explain(p2, false);
    assert!(!client.is_cycle_access_supported());
    assert!(!client.process().cycle_access_enabled());
    client.shutdown();
}

#[test]
fn test_grid_fed_by_session() {
    let f = fixture();
    let client = f.grid_client();
    let grid = Arc::new(ViewGrid::new(
        "live",
        GridType::Portfolio,
        &f.portfolio.definition,
        client.clone(),
        f.channel.clone(),
        GridConfig::default(),
    ));
    grid.attach();
    grid.set_viewport(viewport(&[ROOT_ROW]));
    let result = client.run_one_cycle().unwrap();
    assert_eq!(
        result.get(CONFIG, &present_value(TestPortfolio::root())),
        Some(&Value::Number(1250.0))
    );

    let topic = grid.updates_topic();
    assert!(wait_until(|| f.channel.on_topic(&topic).len() == 1));
    let update = &f.channel.on_topic(&topic)[0];
    assert_eq!(update["rowId"], json!(ROOT_ROW));
    assert_eq!(update["0"]["display"], json!(1250.0));
    let delivered = f.channel.delivered();
    assert!(delivered.iter().all(|d| d.session_id == client.unique_id()));
    client.shutdown();
}

#[test]
fn test_large_portfolio_updates_only_viewport_rows() {
    const POSITIONS: usize = 4_000;
    let portfolio = TestPortfolio::new();
    let targets: Vec<TargetRef> = (0..POSITIONS).map(|i| pos(&format!("L{i}"))).collect();
    let definition = viewcalc_engine::ViewDefinition::new("large")
        .with_portfolio(targets.clone())
        .with_configuration(
            viewcalc_engine::CalcConfiguration::new(CONFIG)
                .with_portfolio_requirement("PV", viewcalc_common::ValueProperties::none()),
        );
    let channel = Arc::new(RecordingChannel::new());
    let grid = ViewGrid::new(
        "large",
        GridType::Portfolio,
        &definition,
        Arc::new(attach(&start(&portfolio))),
        channel.clone(),
        GridConfig::default(),
    );
    let values: Vec<(TargetRef, Value)> = targets
        .iter()
        .enumerate()
        .map(|(i, t)| (t.clone(), Value::Number(i as f64)))
        .collect();
    grid.process_result(&pv_model(1, 1_000, &values));
    assert!(channel.on_topic(&grid.updates_topic()).is_empty());
    assert_eq!(channel.on_topic(&grid.columns_topic()).len(), 1);

    grid.set_viewport(viewport(&[5, 3_999]));
    grid.process_result(&pv_model(2, 2_000, &values));
    let updates = channel.on_topic(&grid.updates_topic());
    assert_eq!(updates.len(), 2);
    let row = |id: u64| {
        updates
            .iter()
            .find(|u| u["rowId"] == json!(id))
            .cloned()
            .unwrap()
    };
    assert_eq!(row(5)["0"]["display"], json!(5.0));
    assert_eq!(row(3_999)["0"]["display"], json!(3_999.0));
    // Both cycles were recorded even while the row was out of view
    assert_eq!(row(3_999)["0"]["history"].as_array().map(Vec::len), Some(2));
}
