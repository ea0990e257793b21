//! Small in-memory portfolio for tests, benches and examples.
//!
//! Two securities feed fair values, two positions scale them, and a root
//! portfolio node sums the positions:
//!
//! ```text
//! Spot[AAPL] -> FairValue[AAPL] -> PV[P1] \
//!                                          PV[ROOT]
//! Spot[MSFT] -> FairValue[MSFT] -> PV[P2] /
//! ```

use std::sync::Arc;

use viewcalc_common::{
    TargetRef, Value, ValueProperties, ValueRequirement, ValueSpec, property_names,
};

use crate::function::{FnFunction, FunctionError, FunctionInputs, FunctionInvoker};
use crate::graph::{DependencyGraph, DependencyNode};
use crate::live_data::InMemoryLiveData;
use crate::process::{EngineError, ViewProcess};
use crate::view::{CalcConfiguration, PrebuiltGraphBuilder, ViewDefinition};
use crate::EngineConfig;

pub const CONFIG: &str = "Default";
pub const VIEW_NAME: &str = "Test View";

fn function_props(function: &str) -> ValueProperties {
    ValueProperties::builder()
        .with(property_names::FUNCTION, function)
        .build()
        .unwrap_or_default()
}

pub fn spot(security: &str) -> ValueSpec {
    ValueSpec::new("Spot", TargetRef::security(security), ValueProperties::none())
}

pub fn fair_value(security: &str) -> ValueSpec {
    ValueSpec::new(
        "FairValue",
        TargetRef::security(security),
        function_props("fair_value"),
    )
}

pub fn present_value(target: TargetRef) -> ValueSpec {
    let props = ValueProperties::builder()
        .with(property_names::FUNCTION, "present_value")
        .with(property_names::CURRENCY, "USD")
        .build()
        .unwrap_or_default();
    ValueSpec::new("PV", target, props)
}

/// Sum of numeric inputs times `factor`; fails on any non-numeric input.
pub fn scale_function(name: &str, factor: f64) -> Arc<dyn FunctionInvoker> {
    Arc::new(FnFunction::new(
        name,
        move |_target: &TargetRef, inputs: &FunctionInputs<'_>| {
            let mut total = 0.0;
            for (spec, value) in inputs.iter() {
                total += value
                    .as_number()
                    .ok_or_else(|| FunctionError::failed(format!("{spec} is not numeric")))?;
            }
            Ok(Value::Number(total * factor))
        },
    ))
}

pub fn sum_function(name: &str) -> Arc<dyn FunctionInvoker> {
    scale_function(name, 1.0)
}

pub fn failing_function(name: &str) -> Arc<dyn FunctionInvoker> {
    let message = format!("{name} always fails");
    Arc::new(FnFunction::new(
        name,
        move |_: &TargetRef, _: &FunctionInputs<'_>| Err(FunctionError::failed(message.clone())),
    ))
}

pub struct TestPortfolio {
    pub definition: ViewDefinition,
    pub graph: DependencyGraph,
    pub live_data: Arc<InMemoryLiveData>,
}

impl TestPortfolio {
    pub fn root() -> TargetRef {
        TargetRef::portfolio_node("ROOT")
    }

    pub fn new() -> Self {
        Self::with_position_function(
            scale_function("present_value", 10.0),
            scale_function("present_value", 5.0),
        )
    }

    /// Same shape with custom functions for the two positions.
    pub fn with_position_function(
        p1: Arc<dyn FunctionInvoker>,
        p2: Arc<dyn FunctionInvoker>,
    ) -> Self {
        let fv = sum_function("fair_value");
        let root = Self::root();
        let (pos1, pos2) = (TargetRef::position("P1"), TargetRef::position("P2"));

        let mut graph = DependencyGraph::new(CONFIG);
        for sec in ["AAPL", "MSFT"] {
            graph.add_node(
                DependencyNode::new(fv.clone(), TargetRef::security(sec))
                    .with_input(spot(sec))
                    .with_output(fair_value(sec)),
            );
        }
        graph.add_node(
            DependencyNode::new(p1, pos1.clone())
                .with_input(fair_value("AAPL"))
                .with_output(present_value(pos1.clone())),
        );
        graph.add_node(
            DependencyNode::new(p2, pos2.clone())
                .with_input(fair_value("MSFT"))
                .with_output(present_value(pos2.clone())),
        );
        graph.add_node(
            DependencyNode::new(sum_function("sum_positions"), root.clone())
                .with_input(present_value(pos1.clone()))
                .with_input(present_value(pos2.clone()))
                .with_output(present_value(root.clone())),
        );

        let definition = ViewDefinition::new(VIEW_NAME)
            .with_portfolio([root, pos1, pos2])
            .with_configuration(
                CalcConfiguration::new(CONFIG)
                    .with_portfolio_requirement("PV", ValueProperties::none()),
            );

        let live_data = Arc::new(InMemoryLiveData::new());
        live_data.set_value(ValueRequirement::from(&spot("AAPL")), 100.0);
        live_data.set_value(ValueRequirement::from(&spot("MSFT")), 50.0);

        Self {
            definition,
            graph,
            live_data,
        }
    }

    pub fn set_spot(&self, security: &str, value: f64) {
        self.live_data
            .set_value(ValueRequirement::from(&spot(security)), value);
    }

    pub fn builder(&self) -> Arc<PrebuiltGraphBuilder> {
        Arc::new(PrebuiltGraphBuilder::new().with_graph(self.graph.clone()))
    }

    pub fn start(&self, config: EngineConfig) -> Result<ViewProcess, EngineError> {
        ViewProcess::start(
            self.definition.clone(),
            self.builder(),
            self.live_data.clone(),
            config,
        )
    }
}

impl Default for TestPortfolio {
    fn default() -> Self {
        Self::new()
    }
}
