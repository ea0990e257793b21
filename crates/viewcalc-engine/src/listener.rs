use std::sync::Arc;

use crate::process::EngineError;
use crate::result::{DeltaResultModel, ResultModel};
use crate::view::CompilationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Receives everything a view process publishes.
///
/// Callbacks run on the process's cycle thread and should hand work off
/// rather than block.
pub trait ViewResultListener: Send + Sync {
    fn cycle_completed(&self, full: &Arc<ResultModel>, delta: &Arc<DeltaResultModel>);

    fn compilation_failed(&self, _error: &CompilationError) {}

    fn cycle_failed(&self, _error: &EngineError) {}

    fn process_terminated(&self) {}
}
