//! viewcalc view computation engine
//!
//! Repeatedly evaluates per-configuration dependency graphs against live input
//! snapshots, caches each cycle's values, and publishes full and delta result
//! models to attached listeners.

pub mod awaiter;
pub mod cache;
pub mod cycle;
pub mod function;
pub mod graph;
pub mod lease;
pub mod listener;
pub mod live_data;
pub mod metrics;
pub mod process;
pub mod result;
pub mod scheduler;
pub mod view;

pub mod test_view;

#[cfg(test)]
mod tests;

pub use awaiter::{CancelHandle, CycleCompletion, NextCycle, WaitError};
pub use cache::{CacheWriter, ComputationCache};
pub use cycle::{CycleEvaluator, CycleId, ViewCycle};
pub use function::{FnFunction, FunctionError, FunctionInputs, FunctionInvoker};
pub use graph::{DependencyGraph, DependencyGraphExplorer, DependencyNode, NodeId};
pub use lease::{CycleLease, CycleLeaseManager, LeaseError};
pub use listener::{ListenerId, ViewResultListener};
pub use live_data::{InMemoryLiveData, LiveDataProvider, LiveDataSnapshot};
pub use metrics::{CycleMetrics, CycleMetricsSnapshot};
pub use process::{EngineError, ProcessState, ViewProcess};
pub use result::{DeltaResultModel, ResultModel, TargetResult};
pub use scheduler::{Layer, Schedule, Scheduler};
pub use view::{
    CalcConfiguration, CompilationError, CompiledView, GraphBuilder, PrebuiltGraphBuilder,
    ViewDefinition,
};

use std::time::Duration;

/// When the view process runs cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// A cycle runs for every `trigger_cycle` call.
    Triggered,
    /// Cycles run back to back, at most once per `min_period`, and on trigger.
    Continuous { min_period: Duration },
}

/// Configuration for the view process
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub enable_parallel: bool,
    pub max_threads: Option<usize>,
    /// Layers smaller than this are evaluated on the cycle thread.
    pub parallel_layer_threshold: usize,
    pub execution_mode: ExecutionMode,
    /// Keep the latest cycle leasable even when no consumer asked for cycle access.
    pub retain_latest_cycle: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_parallel: true,
            max_threads: None,
            parallel_layer_threshold: 2,
            execution_mode: ExecutionMode::Triggered,
            retain_latest_cycle: false,
        }
    }
}
