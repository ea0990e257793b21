//! View definitions and their compiled form.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use thiserror::Error;
use viewcalc_common::{TargetRef, ValueProperties, ValueRequirement};

use crate::graph::{DependencyGraph, DependencyGraphExplorer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    #[error("no dependency graph available for configuration `{0}`")]
    MissingConfiguration(String),

    #[error("requirement {requirement} in configuration `{config}` cannot be satisfied")]
    Unsatisfiable {
        config: String,
        requirement: ValueRequirement,
    },

    #[error("graph builder failed: {0}")]
    Builder(String),
}

/// A named bundle of requirements.
#[derive(Debug, Clone, Default)]
pub struct CalcConfiguration {
    name: String,
    portfolio_requirements: Vec<(String, ValueProperties)>,
    specific_requirements: Vec<ValueRequirement>,
}

impl CalcConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Request `value_name` on every portfolio-level target of the view.
    pub fn with_portfolio_requirement(
        mut self,
        value_name: impl Into<String>,
        constraints: ValueProperties,
    ) -> Self {
        self.portfolio_requirements
            .push((value_name.into(), constraints));
        self
    }

    pub fn with_specific_requirement(mut self, requirement: ValueRequirement) -> Self {
        self.specific_requirements.push(requirement);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn portfolio_requirements(&self) -> &[(String, ValueProperties)] {
        &self.portfolio_requirements
    }

    pub fn specific_requirements(&self) -> &[ValueRequirement] {
        &self.specific_requirements
    }

    /// Specific requirements plus the portfolio requirements expanded over
    /// the portfolio-level entries of `portfolio`.
    pub fn requirements(&self, portfolio: &[TargetRef]) -> Vec<ValueRequirement> {
        let mut out = self.specific_requirements.clone();
        for target in portfolio
            .iter()
            .filter(|t| t.target_type().is_portfolio_level())
        {
            for (value_name, constraints) in &self.portfolio_requirements {
                out.push(ValueRequirement::new(
                    value_name.as_str(),
                    target.clone(),
                    constraints.clone(),
                ));
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct ViewDefinition {
    name: String,
    portfolio: Vec<TargetRef>,
    configurations: Vec<CalcConfiguration>,
}

impl ViewDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            portfolio: Vec::new(),
            configurations: Vec::new(),
        }
    }

    pub fn with_portfolio(mut self, targets: impl IntoIterator<Item = TargetRef>) -> Self {
        self.portfolio.extend(targets);
        self
    }

    pub fn with_configuration(mut self, config: CalcConfiguration) -> Self {
        self.configurations.push(config);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn portfolio(&self) -> &[TargetRef] {
        &self.portfolio
    }

    pub fn configurations(&self) -> &[CalcConfiguration] {
        &self.configurations
    }

    pub fn configuration(&self, name: &str) -> Option<&CalcConfiguration> {
        self.configurations.iter().find(|c| c.name == name)
    }
}

/// A view definition bound to one dependency graph per configuration.
#[derive(Debug)]
pub struct CompiledView {
    definition: Arc<ViewDefinition>,
    valuation_time: DateTime<Utc>,
    graphs: BTreeMap<String, Arc<DependencyGraph>>,
}

impl CompiledView {
    pub fn new(
        definition: Arc<ViewDefinition>,
        valuation_time: DateTime<Utc>,
        graphs: BTreeMap<String, Arc<DependencyGraph>>,
    ) -> Self {
        Self {
            definition,
            valuation_time,
            graphs,
        }
    }

    pub fn definition(&self) -> &Arc<ViewDefinition> {
        &self.definition
    }

    pub fn valuation_time(&self) -> DateTime<Utc> {
        self.valuation_time
    }

    pub fn graph(&self, config: &str) -> Option<&Arc<DependencyGraph>> {
        self.graphs.get(config)
    }

    pub fn graphs(&self) -> impl Iterator<Item = (&str, &Arc<DependencyGraph>)> {
        self.graphs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn explorer(&self, config: &str) -> Option<&dyn DependencyGraphExplorer> {
        self.graphs
            .get(config)
            .map(|g| g.as_ref() as &dyn DependencyGraphExplorer)
    }

    /// Union of every configuration's live inputs.
    pub fn live_data_requirements(&self) -> BTreeSet<ValueRequirement> {
        self.graphs
            .values()
            .flat_map(|g| g.live_data_requirements())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graphs.values().map(|g| g.len()).sum()
    }
}

/// Compiles view definitions into dependency graphs.
pub trait GraphBuilder: Send + Sync {
    fn compile(
        &self,
        definition: &Arc<ViewDefinition>,
        valuation_time: DateTime<Utc>,
    ) -> Result<CompiledView, CompilationError>;
}

/// Serves graphs assembled up front, checking each configuration's
/// requirements against the graph's outputs.
#[derive(Debug, Default)]
pub struct PrebuiltGraphBuilder {
    graphs: FxHashMap<String, Arc<DependencyGraph>>,
}

impl PrebuiltGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graph(mut self, graph: DependencyGraph) -> Self {
        self.graphs
            .insert(graph.configuration_name().to_string(), Arc::new(graph));
        self
    }
}

impl GraphBuilder for PrebuiltGraphBuilder {
    fn compile(
        &self,
        definition: &Arc<ViewDefinition>,
        valuation_time: DateTime<Utc>,
    ) -> Result<CompiledView, CompilationError> {
        let mut graphs = BTreeMap::new();
        for config in definition.configurations() {
            let graph = self
                .graphs
                .get(config.name())
                .ok_or_else(|| CompilationError::MissingConfiguration(config.name().to_string()))?;

            if let Some(requirement) = config
                .requirements(definition.portfolio())
                .into_iter()
                .find(|r| !graph.satisfies(r))
            {
                return Err(CompilationError::Unsatisfiable {
                    config: config.name().to_string(),
                    requirement,
                });
            }
            graphs.insert(config.name().to_string(), graph.clone());
        }
        Ok(CompiledView::new(definition.clone(), valuation_time, graphs))
    }
}
