//! One evaluation pass over a compiled view.
//!
//! [`CycleEvaluator`] sources live inputs from a snapshot, walks every
//! configuration's graph layer by layer, and records each node's outputs in a
//! fresh cache. The result is an immutable [`ViewCycle`].

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rayon::ThreadPool;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use viewcalc_common::{NotCalculated, Value, ValueRequirement, ValueSpec};

use crate::cache::{CacheWriter, ComputationCache};
use crate::function::FunctionInputs;
use crate::graph::{DependencyGraph, DependencyGraphExplorer, DependencyNode, NodeId};
use crate::live_data::LiveDataSnapshot;
use crate::metrics::{CycleMetrics, CycleTimer};
use crate::result::ResultModel;
use crate::scheduler::{Layer, Scheduler};
use crate::view::CompiledView;

/// Monotonic identifier of a cycle within one view process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CycleId(pub u64);

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle-{}", self.0)
    }
}

/// A completed cycle: its cache, result model and the graphs that produced them.
pub struct ViewCycle {
    id: CycleId,
    compiled: Arc<CompiledView>,
    valuation_time: DateTime<Utc>,
    start_time: DateTime<Utc>,
    duration: Duration,
    cache: ComputationCache,
    result: Arc<ResultModel>,
}

impl ViewCycle {
    pub fn id(&self) -> CycleId {
        self.id
    }

    pub fn compiled_view(&self) -> &Arc<CompiledView> {
        &self.compiled
    }

    pub fn valuation_time(&self) -> DateTime<Utc> {
        self.valuation_time
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn cache(&self) -> &ComputationCache {
        &self.cache
    }

    pub fn result(&self) -> &Arc<ResultModel> {
        &self.result
    }

    pub fn explorer(&self, config: &str) -> Option<&dyn DependencyGraphExplorer> {
        self.compiled.explorer(config)
    }

    /// Cached values for `specs` in `config`; absent keys are left out.
    pub fn query_values<'a>(
        &self,
        config: &str,
        specs: impl IntoIterator<Item = &'a ValueSpec>,
    ) -> FxHashMap<ValueSpec, Value> {
        self.cache.get_all(config, specs)
    }
}

impl fmt::Debug for ViewCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCycle")
            .field("id", &self.id)
            .field("valuation_time", &self.valuation_time)
            .field("duration", &self.duration)
            .field("cached_values", &self.cache.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeStatus {
    Evaluated,
    Failed,
    MissingInputs,
}

struct NodeOutcome {
    status: NodeStatus,
    outputs: SmallVec<[(ValueSpec, Value); 2]>,
}

pub struct CycleEvaluator<'a> {
    compiled: &'a Arc<CompiledView>,
    snapshot: &'a LiveDataSnapshot,
    thread_pool: Option<&'a ThreadPool>,
    parallel_threshold: usize,
    metrics: Option<&'a CycleMetrics>,
}

impl<'a> CycleEvaluator<'a> {
    pub fn new(compiled: &'a Arc<CompiledView>, snapshot: &'a LiveDataSnapshot) -> Self {
        Self {
            compiled,
            snapshot,
            thread_pool: None,
            parallel_threshold: 2,
            metrics: None,
        }
    }

    pub fn with_thread_pool(mut self, pool: Option<&'a ThreadPool>, threshold: usize) -> Self {
        self.thread_pool = pool;
        self.parallel_threshold = threshold.max(2);
        self
    }

    pub fn with_metrics(mut self, metrics: &'a CycleMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn execute(self, id: CycleId, valuation_time: DateTime<Utc>) -> ViewCycle {
        let _span = tracing::info_span!("evaluate_cycle", cycle = id.0).entered();
        let timer = CycleTimer::start();
        let start_time = Utc::now();

        let mut writer = CacheWriter::new();
        let mut result = ResultModel::new(id, valuation_time);

        for (config, graph) in self.compiled.graphs() {
            self.evaluate_graph(config, graph, &mut writer);
            for (_, node) in graph.nodes() {
                for spec in node.outputs() {
                    if let Some(value) = writer.get(config, spec) {
                        result.add_value(config, spec.clone(), value.clone());
                    }
                }
            }
        }

        let duration = timer.elapsed();
        ViewCycle {
            id,
            compiled: self.compiled.clone(),
            valuation_time,
            start_time,
            duration,
            cache: writer.freeze(),
            result: Arc::new(result.with_result_timestamp(Utc::now())),
        }
    }

    fn evaluate_graph(&self, config: &str, graph: &DependencyGraph, writer: &mut CacheWriter) {
        let _span =
            tracing::debug_span!("evaluate_graph", config = config, nodes = graph.len()).entered();

        // Live inputs first; anything the snapshot lacks stays absent.
        let mut sourced = 0usize;
        for spec in graph.live_data_inputs() {
            if let Some(value) = self.snapshot.get(&ValueRequirement::from(spec)) {
                writer.put(config, spec.clone(), value.clone());
                sourced += 1;
            }
        }
        tracing::trace!(config, sourced, "live inputs written");

        let schedule = Scheduler::new(graph).create_schedule();

        for cycle in &schedule.cycles {
            tracing::warn!(config, nodes = cycle.len(), "dependency cycle; marking outputs");
            if let Some(metrics) = self.metrics {
                metrics.inc_nodes_in_cycles(cycle.len());
            }
            for node in cycle.iter().filter_map(|id| graph.node(*id)) {
                for spec in node.outputs() {
                    writer.put(
                        config,
                        spec.clone(),
                        Value::NotCalculated(NotCalculated::EvaluationError),
                    );
                }
            }
        }

        for layer in &schedule.layers {
            let outcomes = match self.thread_pool {
                Some(pool) if layer.nodes.len() >= self.parallel_threshold => {
                    self.evaluate_layer_parallel(pool, config, graph, layer, writer)
                }
                _ => self.evaluate_layer_sequential(config, graph, layer, writer),
            };
            self.store_outcomes(config, outcomes, writer);
        }
    }

    fn evaluate_layer_sequential(
        &self,
        config: &str,
        graph: &DependencyGraph,
        layer: &Layer,
        writer: &CacheWriter,
    ) -> Vec<NodeOutcome> {
        layer
            .nodes
            .iter()
            .filter_map(|id| graph.node(*id))
            .map(|node| evaluate_node(config, node, writer))
            .collect()
    }

    /// Collect all outcomes first, then write them back on this thread.
    fn evaluate_layer_parallel(
        &self,
        pool: &ThreadPool,
        config: &str,
        graph: &DependencyGraph,
        layer: &Layer,
        writer: &CacheWriter,
    ) -> Vec<NodeOutcome> {
        use rayon::prelude::*;

        pool.install(|| {
            layer
                .nodes
                .par_iter()
                .filter_map(|id: &NodeId| graph.node(*id))
                .map(|node| evaluate_node(config, node, writer))
                .collect()
        })
    }

    fn store_outcomes(&self, config: &str, outcomes: Vec<NodeOutcome>, writer: &mut CacheWriter) {
        let mut failed = 0;
        let mut missing = 0;
        let evaluated = outcomes.len();
        for outcome in outcomes {
            match outcome.status {
                NodeStatus::Evaluated => {}
                NodeStatus::Failed => failed += 1,
                NodeStatus::MissingInputs => missing += 1,
            }
            for (spec, value) in outcome.outputs {
                writer.put(config, spec, value);
            }
        }
        if let Some(metrics) = self.metrics {
            metrics.inc_nodes_evaluated(evaluated);
            metrics.inc_node_failures(failed);
            metrics.inc_nodes_missing_inputs(missing);
        }
    }
}

fn sentinel_outputs(
    node: &DependencyNode,
    reason: NotCalculated,
) -> SmallVec<[(ValueSpec, Value); 2]> {
    node.outputs()
        .iter()
        .map(|spec| (spec.clone(), Value::NotCalculated(reason)))
        .collect()
}

fn evaluate_node(config: &str, node: &DependencyNode, writer: &CacheWriter) -> NodeOutcome {
    let mut resolved = Vec::with_capacity(node.inputs().len());
    for spec in node.inputs() {
        match writer.get(config, spec) {
            Some(value) if !value.is_not_calculated() => resolved.push((spec, value)),
            _ => {
                tracing::debug!(
                    function = node.function().short_name(),
                    input = %spec,
                    "input unavailable"
                );
                return NodeOutcome {
                    status: NodeStatus::MissingInputs,
                    outputs: sentinel_outputs(node, NotCalculated::MissingInputs),
                };
            }
        }
    }

    let inputs = FunctionInputs::new(resolved);
    let desired: Vec<ValueSpec> = node.outputs().iter().cloned().collect();
    let executed = catch_unwind(AssertUnwindSafe(|| {
        node.function().execute(node.target(), &inputs, &desired)
    }));

    match executed {
        Ok(Ok(values)) => {
            let mut outputs = SmallVec::new();
            for (spec, value) in values {
                if node.outputs().contains(&spec) {
                    outputs.push((spec, value));
                } else {
                    tracing::warn!(
                        function = node.function().short_name(),
                        spec = %spec,
                        "function returned an undeclared output; ignoring"
                    );
                }
            }
            NodeOutcome {
                status: NodeStatus::Evaluated,
                outputs,
            }
        }
        Ok(Err(err)) => {
            tracing::debug!(
                function = node.function().short_name(),
                target = %node.target(),
                error = %err,
                "function failed"
            );
            NodeOutcome {
                status: NodeStatus::Failed,
                outputs: sentinel_outputs(node, NotCalculated::EvaluationError),
            }
        }
        Err(_) => {
            tracing::error!(
                function = node.function().short_name(),
                target = %node.target(),
                "function panicked"
            );
            NodeOutcome {
                status: NodeStatus::Failed,
                outputs: sentinel_outputs(node, NotCalculated::EvaluationError),
            }
        }
    }
}
