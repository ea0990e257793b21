//! Row/column projection of a session's results.
//!
//! A [`ViewGrid`] turns each delivered result model into per-row JSON updates,
//! but only for rows inside the client's current viewport. Column types are
//! learned from the first real value seen for a column and announced once on
//! the column-structure topic.

mod cell;
mod row_tree;
mod structure;

pub use cell::{CellHistory, CellId};
pub use row_tree::RowTree;
pub use structure::{ColumnKey, GridColumn, GridRow, GridStructure, GridType};

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value as JsonValue, json};
use viewcalc_common::{TargetRef, Value, ValueSpec};
use viewcalc_engine::{ResultModel, TargetResult, ViewDefinition};

use crate::GridConfig;
use crate::conversion::{ConversionMode, ConverterRegistry};
use crate::delivery::DeliveryChannel;
use crate::session::{ResultListener, ViewClient};

pub const CONVERSION_ERROR: &str = "Conversion Error";

/// `row id → timestamp of the newest history entry the consumer already has`.
pub type Viewport = BTreeMap<u64, Option<i64>>;

pub struct ViewGrid {
    name: String,
    grid_type: GridType,
    config: GridConfig,
    structure: GridStructure,
    row_tree: Option<RowTree>,
    client: Arc<ViewClient>,
    channel: Arc<dyn DeliveryChannel>,
    converters: ConverterRegistry,
    viewport: RwLock<Arc<Viewport>>,
    full_cells: DashSet<CellId>,
    explain_cells: DashSet<CellId>,
    explain_toggle: Mutex<()>,
    typed_columns: DashSet<u64>,
    history_columns: DashSet<u64>,
    history: CellHistory,
}

impl ViewGrid {
    pub fn new(
        name: impl Into<String>,
        grid_type: GridType,
        definition: &ViewDefinition,
        client: Arc<ViewClient>,
        channel: Arc<dyn DeliveryChannel>,
        config: GridConfig,
    ) -> Self {
        let structure = GridStructure::build(grid_type, definition);
        tracing::debug!(
            grid_rows = structure.rows.len(),
            grid_columns = structure.columns.len(),
            "grid structure built"
        );
        Self {
            name: name.into(),
            grid_type,
            history: CellHistory::new(config.history_size),
            config,
            structure,
            row_tree: None,
            client,
            channel,
            converters: ConverterRegistry::new(),
            viewport: RwLock::new(Arc::new(Viewport::new())),
            full_cells: DashSet::new(),
            explain_cells: DashSet::new(),
            explain_toggle: Mutex::new(()),
            typed_columns: DashSet::new(),
            history_columns: DashSet::new(),
        }
    }

    pub fn with_row_tree(mut self, tree: RowTree) -> Self {
        self.row_tree = Some(tree);
        self
    }

    pub fn with_converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    /// Feed this grid from the session's result listener.
    pub fn attach(self: &Arc<Self>) {
        let grid: Weak<Self> = Arc::downgrade(self);
        let listener: Arc<dyn ResultListener> = Arc::new(move |result: &Arc<ResultModel>| {
            if let Some(grid) = grid.upgrade() {
                grid.process_result(result);
            }
        });
        self.client.set_result_listener(Some(listener));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid_type(&self) -> GridType {
        self.grid_type
    }

    pub fn structure(&self) -> &GridStructure {
        &self.structure
    }

    pub fn updates_topic(&self) -> String {
        format!("/updates/{}", self.name)
    }

    pub fn columns_topic(&self) -> String {
        format!("/gridStructure/{}/columns", self.name)
    }

    pub fn grid_structure(&self) -> JsonValue {
        let rows: Vec<JsonValue> = self.structure.rows.iter().map(GridRow::to_json).collect();
        let columns: Vec<JsonValue> = self
            .structure
            .columns
            .iter()
            .map(|c| self.column_json(c))
            .collect();
        let mut structure = json!({
            "name": self.name,
            "rows": rows,
            "columns": columns,
        });
        let tree = self.row_tree.as_ref().and_then(|t| serde_json::to_value(t).ok());
        if let (Some(tree), Some(obj)) = (tree, structure.as_object_mut()) {
            obj.insert("portfolio".to_string(), tree);
        }
        structure
    }

    fn column_json(&self, column: &GridColumn) -> JsonValue {
        column.to_json(
            &self.config.null_cell_value,
            self.converters.known_type_name(&column.key.value_name),
        )
    }

    /// Replace the viewport wholesale.
    pub fn set_viewport(&self, viewport: Viewport) {
        *self.viewport.write() = Arc::new(viewport);
    }

    pub fn viewport(&self) -> Arc<Viewport> {
        self.viewport.read().clone()
    }

    pub fn set_conversion_mode(&self, cell: CellId, mode: ConversionMode) {
        match mode {
            ConversionMode::Full => {
                self.full_cells.insert(cell);
            }
            ConversionMode::Summary => {
                self.full_cells.remove(&cell);
            }
        }
    }

    pub fn conversion_mode(&self, cell: CellId) -> ConversionMode {
        if self.full_cells.contains(&cell) {
            ConversionMode::Full
        } else {
            ConversionMode::Summary
        }
    }

    /// Toggle the dependency trace for one cell. The session's cycle access
    /// stays enabled while any cell is explained.
    pub fn set_explain(&self, cell: CellId, explain: bool) {
        let _toggle = self.explain_toggle.lock();
        if explain {
            if self.explain_cells.is_empty() {
                self.client.set_cycle_access_supported(true);
            }
            self.explain_cells.insert(cell);
        } else if self.explain_cells.remove(&cell).is_some() && self.explain_cells.is_empty() {
            self.client.set_cycle_access_supported(false);
        }
    }

    pub fn is_explained(&self, cell: CellId) -> bool {
        self.explain_cells.contains(&cell)
    }

    pub fn is_history_column(&self, col: u64) -> bool {
        self.history_columns.contains(&col)
    }

    pub fn process_result(&self, result: &ResultModel) {
        let viewport = self.viewport();
        let timestamp = result.result_timestamp().timestamp_millis();
        for target_result in result.by_target() {
            self.process_entries(&target_result, &viewport, timestamp);
        }
    }

    /// Deliver one row update for `target`, if its row is in the viewport.
    pub fn process_target_result(&self, result: &ResultModel, target: &TargetRef) {
        let timestamp = result.result_timestamp().timestamp_millis();
        self.process_entries(&result.target_result(target), &self.viewport(), timestamp);
    }

    fn process_entries(&self, entries: &TargetResult<'_>, viewport: &Viewport, timestamp: i64) {
        let Some(row) = self.structure.row_of(entries.target()) else {
            return;
        };
        let in_viewport = viewport.get(&row);

        let mut update = Map::new();
        for (config, spec, value) in entries.iter() {
            let Some(column) = self.structure.column_for(config, spec) else {
                continue;
            };
            self.learn_column_type(column, spec, value);
            let cell = CellId::new(row, column.id);
            if self.history_columns.contains(&column.id) {
                self.record_history(cell, spec, value, timestamp);
            }
            if let Some(last_seen) = in_viewport {
                let payload = self.cell_payload(cell, config, spec, value, *last_seen);
                update.insert(column.id.to_string(), payload);
            }
        }

        if in_viewport.is_none() || update.is_empty() {
            return;
        }
        update.insert("rowId".to_string(), JsonValue::from(row));
        self.channel.deliver(
            self.client.unique_id(),
            &self.updates_topic(),
            JsonValue::Object(update),
        );
    }

    fn learn_column_type(&self, column: &GridColumn, spec: &ValueSpec, value: &Value) {
        if value.is_not_calculated() || self.typed_columns.contains(&column.id) {
            return;
        }
        self.converters.converter_for(spec, value);
        if !self.typed_columns.insert(column.id) {
            return;
        }
        if value.kind().keeps_history() {
            self.history_columns.insert(column.id);
        }
        self.channel.deliver(
            self.client.unique_id(),
            &self.columns_topic(),
            self.column_json(column),
        );
    }

    fn record_history(&self, cell: CellId, spec: &ValueSpec, value: &Value, timestamp: i64) {
        match self.converters.convert_for_history(spec, value) {
            Ok(converted) => self.history.record(cell, timestamp, converted),
            Err(err) => {
                tracing::error!(spec = %spec, error = %err, "history conversion failed");
                self.history
                    .record(cell, timestamp, JsonValue::from(CONVERSION_ERROR));
            }
        }
    }

    fn cell_payload(
        &self,
        cell: CellId,
        config: &str,
        spec: &ValueSpec,
        value: &Value,
        last_seen: Option<i64>,
    ) -> JsonValue {
        let mode = self.conversion_mode(cell);
        let display = match self.converters.convert_for_display(spec, value, mode) {
            Ok(display) => display,
            Err(err) => {
                tracing::error!(
                    grid = %self.name,
                    row = cell.row,
                    col = cell.col,
                    spec = %spec,
                    error = %err,
                    "cell conversion failed"
                );
                JsonValue::from(CONVERSION_ERROR)
            }
        };

        let history = self
            .history_columns
            .contains(&cell.col)
            .then(|| self.history.since(cell, last_seen));
        let explain = if self.explain_cells.contains(&cell) {
            self.explain_rows(config, spec)
        } else {
            None
        };

        if history.is_none() && explain.is_none() && mode == ConversionMode::Summary {
            return display;
        }
        let mut payload = Map::new();
        payload.insert("display".to_string(), display);
        if let Some(history) = history {
            payload.insert("history".to_string(), JsonValue::Array(history));
        }
        if let Some(explain) = explain {
            payload.insert("explain".to_string(), explain);
        }
        JsonValue::Object(payload)
    }

    fn explain_rows(&self, config: &str, spec: &ValueSpec) -> Option<JsonValue> {
        match self.client.explain(config, spec) {
            Ok(Some(rows)) => serde_json::to_value(rows).ok(),
            Ok(None) => None,
            Err(err) => {
                tracing::debug!(spec = %spec, error = %err, "dependency trace unavailable");
                None
            }
        }
    }
}

impl std::fmt::Debug for ViewGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewGrid")
            .field("name", &self.name)
            .field("grid_type", &self.grid_type)
            .field("rows", &self.structure.rows.len())
            .field("columns", &self.structure.columns.len())
            .finish()
    }
}
