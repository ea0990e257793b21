//! Common test helpers
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use viewcalc_common::{TargetRef, ValueProperties, ValueSpec};

use crate::awaiter::CycleCompletion;
use crate::cycle::{CycleEvaluator, CycleId, ViewCycle};
use crate::function::FunctionInvoker;
use crate::graph::{DependencyGraph, DependencyNode};
use crate::listener::ViewResultListener;
use crate::live_data::LiveDataProvider;
use crate::process::ViewProcess;
use crate::result::{DeltaResultModel, ResultModel};
use crate::test_view::TestPortfolio;
use crate::view::{CompilationError, CompiledView, GraphBuilder};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn prim(name: &str) -> ValueSpec {
    ValueSpec::new(name, TargetRef::primitive(name), ValueProperties::none())
}

/// Node `name` on a primitive target reading `inputs` and producing `prim(name)`.
pub fn node(function: &Arc<dyn FunctionInvoker>, name: &str, inputs: &[&str]) -> DependencyNode {
    DependencyNode::new(function.clone(), TargetRef::primitive(name))
        .with_inputs(inputs.iter().map(|i| prim(i)))
        .with_output(prim(name))
}

pub fn compile(portfolio: &TestPortfolio) -> Arc<CompiledView> {
    let definition = Arc::new(portfolio.definition.clone());
    Arc::new(
        portfolio
            .builder()
            .compile(&definition, Utc::now())
            .expect("test portfolio compiles"),
    )
}

pub fn evaluate(portfolio: &TestPortfolio) -> ViewCycle {
    let compiled = compile(portfolio);
    let snapshot = portfolio.live_data.snapshot();
    CycleEvaluator::new(&compiled, &snapshot).execute(CycleId(1), Utc::now())
}

/// Wrap one graph in a compiled view with no requirements.
pub fn compiled_single(graph: DependencyGraph) -> Arc<CompiledView> {
    let definition = Arc::new(crate::view::ViewDefinition::new("adhoc"));
    let name = graph.configuration_name().to_string();
    Arc::new(CompiledView::new(
        definition,
        Utc::now(),
        [(name, Arc::new(graph))].into_iter().collect(),
    ))
}

pub fn run_cycle(process: &ViewProcess) -> CycleCompletion {
    let next = process.next_cycle(false);
    process.trigger_cycle().expect("process running");
    next.wait(TIMEOUT).expect("cycle completes")
}

pub fn run_cycle_leased(process: &ViewProcess) -> CycleCompletion {
    let next = process.next_cycle(true);
    process.trigger_cycle().expect("process running");
    next.wait(TIMEOUT).expect("cycle completes")
}

#[derive(Default)]
pub struct RecordingListener {
    pub completed: Mutex<Vec<(Arc<ResultModel>, Arc<DeltaResultModel>)>>,
    pub compile_failures: Mutex<Vec<CompilationError>>,
    pub terminated: AtomicBool,
}

impl RecordingListener {
    pub fn completed_count(&self) -> usize {
        self.completed.lock().len()
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl ViewResultListener for RecordingListener {
    fn cycle_completed(&self, full: &Arc<ResultModel>, delta: &Arc<DeltaResultModel>) {
        self.completed.lock().push((full.clone(), delta.clone()));
    }

    fn compilation_failed(&self, error: &CompilationError) {
        self.compile_failures.lock().push(error.clone());
    }

    fn process_terminated(&self) {
        self.terminated.store(true, Ordering::Release);
    }
}
