//! The seam between the engine and the function library.
//!
//! Functions are opaque: the engine hands a [`FunctionInvoker`] the resolved
//! inputs of one dependency node and stores whatever it returns.

use std::fmt;

use thiserror::Error;
use viewcalc_common::{TargetRef, Value, ValueSpec};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    #[error("{0}")]
    Failed(String),

    #[error("required input {0} not supplied")]
    MissingInput(ValueSpec),
}

impl FunctionError {
    pub fn failed(message: impl Into<String>) -> Self {
        FunctionError::Failed(message.into())
    }
}

/// Resolved input values of one node, in the node's input order.
pub struct FunctionInputs<'a> {
    values: Vec<(&'a ValueSpec, &'a Value)>,
}

impl<'a> FunctionInputs<'a> {
    pub fn new(values: Vec<(&'a ValueSpec, &'a Value)>) -> Self {
        Self { values }
    }

    pub fn get(&self, spec: &ValueSpec) -> Option<&'a Value> {
        self.values
            .iter()
            .find(|(s, _)| *s == spec)
            .map(|(_, v)| *v)
    }

    /// First input carrying `value_name`, whatever its target or properties.
    pub fn value_named(&self, value_name: &str) -> Option<&'a Value> {
        self.values
            .iter()
            .find(|(s, _)| s.value_name() == value_name)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a ValueSpec, &'a Value)> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A compiled function bound into a dependency node.
pub trait FunctionInvoker: Send + Sync {
    /// Short display name, shown in dependency traces.
    fn short_name(&self) -> &str;

    /// Compute `desired_outputs` for `target`. Outputs left out of the returned
    /// vector are treated as not materialized.
    fn execute(
        &self,
        target: &TargetRef,
        inputs: &FunctionInputs<'_>,
        desired_outputs: &[ValueSpec],
    ) -> Result<Vec<(ValueSpec, Value)>, FunctionError>;
}

impl fmt::Debug for dyn FunctionInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionInvoker({})", self.short_name())
    }
}

/// Adapts a closure producing a single value into a [`FunctionInvoker`];
/// the value is assigned to every desired output.
pub struct FnFunction<F> {
    name: String,
    func: F,
}

impl<F> FnFunction<F>
where
    F: Fn(&TargetRef, &FunctionInputs<'_>) -> Result<Value, FunctionError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> FunctionInvoker for FnFunction<F>
where
    F: Fn(&TargetRef, &FunctionInputs<'_>) -> Result<Value, FunctionError> + Send + Sync,
{
    fn short_name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        target: &TargetRef,
        inputs: &FunctionInputs<'_>,
        desired_outputs: &[ValueSpec],
    ) -> Result<Vec<(ValueSpec, Value)>, FunctionError> {
        let value = (self.func)(target, inputs)?;
        Ok(desired_outputs
            .iter()
            .map(|spec| (spec.clone(), value.clone()))
            .collect())
    }
}
