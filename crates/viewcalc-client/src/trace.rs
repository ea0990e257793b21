//! Dependency traces: which nodes produced a value, and with what inputs.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use serde_json::Value as JsonValue;
use viewcalc_common::{TargetRef, Value, ValueSpec};
use viewcalc_engine::{DependencyGraph, DependencyGraphExplorer, ViewCycle};

use crate::conversion::plain_json;
use crate::error::SessionError;
use crate::session::ViewClient;

/// Function name shown for inputs sourced from live data.
pub const LIVE_DATA_FUNCTION: &str = "LiveData";

const CONVERSION_ERROR: &str = "Conversion Error";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRow {
    pub row_id: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_row_id: Option<usize>,
    pub indent: usize,
    pub target_type: &'static str,
    pub target: String,
    pub function: String,
    pub value_name: String,
    pub properties: String,
    pub value: JsonValue,
}

/// Rows for `spec` and everything it depends on in `config`, depth first
/// from the producing node. `None` when `spec` is not produced there.
///
/// Every input edge gets a row; a producer shared by several consumers has
/// its own inputs expanded only under its first row.
pub fn trace_dependencies(
    cycle: &ViewCycle,
    config: &str,
    spec: &ValueSpec,
) -> Option<Vec<TraceRow>> {
    let explorer = cycle.explorer(config)?;
    let subgraph = explorer.subgraph_producing(spec)?;

    let specs: Vec<&ValueSpec> = subgraph
        .nodes()
        .flat_map(|(_, node)| node.outputs().iter().chain(node.inputs()))
        .collect();
    let values = cycle.query_values(config, specs);

    let mut walk = TraceWalk {
        graph: &subgraph,
        values: &values,
        rows: Vec::new(),
        expanded: FxHashSet::default(),
    };
    walk.run(spec);
    tracing::debug!(config, spec = %spec, rows = walk.rows.len(), "dependency trace built");
    Some(walk.rows)
}

struct TraceWalk<'a> {
    graph: &'a DependencyGraph,
    values: &'a FxHashMap<ValueSpec, Value>,
    rows: Vec<TraceRow>,
    expanded: FxHashSet<&'a ValueSpec>,
}

impl<'a> TraceWalk<'a> {
    fn run(&mut self, root: &'a ValueSpec) {
        // (spec, parent row, indent); inputs pushed in reverse to keep input order
        let mut pending: Vec<(&'a ValueSpec, Option<usize>, usize)> = vec![(root, None, 0)];
        while let Some((spec, parent, indent)) = pending.pop() {
            let row_id = self.push_row(spec, parent, indent);
            let Some(node) = self.graph.node_producing(spec) else {
                continue;
            };
            if !self.expanded.insert(spec) {
                continue;
            }
            for input in node.inputs().iter().rev() {
                pending.push((input, Some(row_id), indent + 1));
            }
        }
    }

    fn push_row(&mut self, spec: &ValueSpec, parent: Option<usize>, indent: usize) -> usize {
        let row_id = self.rows.len();
        let (target, function): (&TargetRef, String) = match self.graph.node_producing(spec) {
            Some(node) => (node.target(), node.function().short_name().to_string()),
            None => (spec.target(), LIVE_DATA_FUNCTION.to_string()),
        };
        let value = match self.values.get(spec) {
            Some(value) => plain_json(value).unwrap_or_else(|err| {
                tracing::error!(spec = %spec, error = %err, "trace value conversion failed");
                JsonValue::from(CONVERSION_ERROR)
            }),
            None => JsonValue::Null,
        };
        self.rows.push(TraceRow {
            row_id,
            parent_row_id: parent,
            indent,
            target_type: target.target_type().short_name(),
            target: target.id().to_string(),
            function,
            value_name: spec.value_name().to_string(),
            properties: spec.properties().to_string(),
            value,
        });
        row_id
    }
}

impl ViewClient {
    /// Trace `spec` against the latest cycle. Needs cycle access.
    pub fn explain(
        &self,
        config: &str,
        spec: &ValueSpec,
    ) -> Result<Option<Vec<TraceRow>>, SessionError> {
        let lease = self.create_latest_cycle_lease()?;
        let rows = trace_dependencies(lease.cycle(), config, spec);
        lease.release();
        Ok(rows)
    }
}
