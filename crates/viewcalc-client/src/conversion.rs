//! Turning computed values into JSON for display and history.
//!
//! Each value name is bound to one converter the first time a real value for
//! it is seen; that binding also fixes the column type reported to grids.
//! Not-calculated sentinels always go through [`NotCalculatedConverter`].

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use serde_json::{Number, Value as JsonValue, json};
use viewcalc_common::{Value, ValueKind, ValueSpec};

use crate::error::ConversionError;

/// How much of a value a cell shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConversionMode {
    #[default]
    Summary,
    Full,
}

pub trait ResultConverter: Send + Sync {
    /// Column data type reported for values handled by this converter.
    fn type_name(&self) -> &'static str;

    fn convert_for_display(
        &self,
        spec: &ValueSpec,
        value: &Value,
        mode: ConversionMode,
    ) -> Result<JsonValue, ConversionError>;

    fn convert_for_history(
        &self,
        spec: &ValueSpec,
        value: &Value,
    ) -> Result<JsonValue, ConversionError> {
        self.convert_for_display(spec, value, ConversionMode::Summary)
    }
}

/// The value's natural JSON form.
pub fn plain_json(value: &Value) -> Result<JsonValue, ConversionError> {
    Ok(match value {
        Value::Number(n) => json_number(*n)?,
        Value::Int(i) => JsonValue::from(*i),
        Value::Text(s) => JsonValue::String(s.clone()),
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Vector(items) => JsonValue::Array(
            items
                .iter()
                .map(|n| json_number(*n))
                .collect::<Result<_, _>>()?,
        ),
        Value::NotCalculated(reason) => JsonValue::String(reason.to_string()),
    })
}

fn json_number(n: f64) -> Result<JsonValue, ConversionError> {
    Number::from_f64(n)
        .map(JsonValue::Number)
        .ok_or_else(|| ConversionError::NotRepresentable(n.to_string()))
}

fn expect_kind(
    converter: &'static str,
    value: &Value,
    kind: ValueKind,
) -> Result<(), ConversionError> {
    if value.kind() == kind {
        Ok(())
    } else {
        Err(ConversionError::UnexpectedKind {
            converter,
            found: value.kind(),
        })
    }
}

pub struct DoubleConverter;

impl ResultConverter for DoubleConverter {
    fn type_name(&self) -> &'static str {
        "DOUBLE"
    }

    fn convert_for_display(
        &self,
        _spec: &ValueSpec,
        value: &Value,
        _mode: ConversionMode,
    ) -> Result<JsonValue, ConversionError> {
        expect_kind(self.type_name(), value, ValueKind::Number)?;
        plain_json(value)
    }
}

pub struct IntegerConverter;

impl ResultConverter for IntegerConverter {
    fn type_name(&self) -> &'static str {
        "INTEGER"
    }

    fn convert_for_display(
        &self,
        _spec: &ValueSpec,
        value: &Value,
        _mode: ConversionMode,
    ) -> Result<JsonValue, ConversionError> {
        expect_kind(self.type_name(), value, ValueKind::Int)?;
        plain_json(value)
    }
}

pub struct StringConverter;

impl ResultConverter for StringConverter {
    fn type_name(&self) -> &'static str {
        "STRING"
    }

    fn convert_for_display(
        &self,
        _spec: &ValueSpec,
        value: &Value,
        _mode: ConversionMode,
    ) -> Result<JsonValue, ConversionError> {
        expect_kind(self.type_name(), value, ValueKind::Text)?;
        plain_json(value)
    }
}

pub struct BooleanConverter;

impl ResultConverter for BooleanConverter {
    fn type_name(&self) -> &'static str {
        "BOOLEAN"
    }

    fn convert_for_display(
        &self,
        _spec: &ValueSpec,
        value: &Value,
        _mode: ConversionMode,
    ) -> Result<JsonValue, ConversionError> {
        expect_kind(self.type_name(), value, ValueKind::Boolean)?;
        plain_json(value)
    }
}

/// Summary shows the length only; full mode carries every element.
pub struct VectorConverter;

impl ResultConverter for VectorConverter {
    fn type_name(&self) -> &'static str {
        "VECTOR"
    }

    fn convert_for_display(
        &self,
        _spec: &ValueSpec,
        value: &Value,
        mode: ConversionMode,
    ) -> Result<JsonValue, ConversionError> {
        expect_kind(self.type_name(), value, ValueKind::Vector)?;
        let Value::Vector(items) = value else {
            return Err(ConversionError::NotRepresentable(value.to_string()));
        };
        match mode {
            ConversionMode::Summary => {
                Ok(json!({ "summary": format!("Vector ({})", items.len()) }))
            }
            ConversionMode::Full => Ok(json!({
                "summary": format!("Vector ({})", items.len()),
                "detail": plain_json(value)?,
            })),
        }
    }

    fn convert_for_history(
        &self,
        _spec: &ValueSpec,
        value: &Value,
    ) -> Result<JsonValue, ConversionError> {
        expect_kind(self.type_name(), value, ValueKind::Vector)?;
        plain_json(value)
    }
}

pub struct NotCalculatedConverter;

impl ResultConverter for NotCalculatedConverter {
    fn type_name(&self) -> &'static str {
        "NOT_CALCULATED"
    }

    fn convert_for_display(
        &self,
        _spec: &ValueSpec,
        value: &Value,
        _mode: ConversionMode,
    ) -> Result<JsonValue, ConversionError> {
        expect_kind(self.type_name(), value, ValueKind::NotCalculated)?;
        plain_json(value)
    }
}

fn default_converter(kind: ValueKind) -> Arc<dyn ResultConverter> {
    match kind {
        ValueKind::Number => Arc::new(DoubleConverter),
        ValueKind::Int => Arc::new(IntegerConverter),
        ValueKind::Text => Arc::new(StringConverter),
        ValueKind::Boolean => Arc::new(BooleanConverter),
        ValueKind::Vector => Arc::new(VectorConverter),
        ValueKind::NotCalculated => Arc::new(NotCalculatedConverter),
    }
}

/// Chooses and remembers the converter for each value name.
pub struct ConverterRegistry {
    overrides: FxHashMap<String, Arc<dyn ResultConverter>>,
    bound: DashMap<String, Arc<dyn ResultConverter>>,
    not_calculated: Arc<dyn ResultConverter>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self {
            overrides: FxHashMap::default(),
            bound: DashMap::new(),
            not_calculated: Arc::new(NotCalculatedConverter),
        }
    }

    /// Always use `converter` for `value_name`, whatever its values look like.
    pub fn with_override(
        mut self,
        value_name: impl Into<String>,
        converter: Arc<dyn ResultConverter>,
    ) -> Self {
        self.overrides.insert(value_name.into(), converter);
        self
    }

    /// Converter for `value` under `spec`'s value name. The first real value
    /// seen for a name binds its converter.
    pub fn converter_for(&self, spec: &ValueSpec, value: &Value) -> Arc<dyn ResultConverter> {
        if let Some(converter) = self.overrides.get(spec.value_name()) {
            return converter.clone();
        }
        if value.is_not_calculated() {
            return self.not_calculated.clone();
        }
        self.bound
            .entry(spec.value_name().to_string())
            .or_insert_with(|| {
                tracing::debug!(
                    value_name = spec.value_name(),
                    kind = ?value.kind(),
                    "binding result converter"
                );
                default_converter(value.kind())
            })
            .clone()
    }

    /// Data type of `value_name`, once a converter has been chosen for it.
    pub fn known_type_name(&self, value_name: &str) -> Option<&'static str> {
        self.overrides
            .get(value_name)
            .map(|c| c.type_name())
            .or_else(|| self.bound.get(value_name).map(|c| c.type_name()))
    }

    pub fn convert_for_display(
        &self,
        spec: &ValueSpec,
        value: &Value,
        mode: ConversionMode,
    ) -> Result<JsonValue, ConversionError> {
        self.converter_for(spec, value)
            .convert_for_display(spec, value, mode)
    }

    pub fn convert_for_history(
        &self,
        spec: &ValueSpec,
        value: &Value,
    ) -> Result<JsonValue, ConversionError> {
        self.converter_for(spec, value)
            .convert_for_history(spec, value)
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viewcalc_common::{NotCalculated, TargetRef, ValueProperties};

    fn spec(name: &str) -> ValueSpec {
        ValueSpec::new(name, TargetRef::position("P1"), ValueProperties::none())
    }

    #[test]
    fn first_real_value_binds_type() {
        let registry = ConverterRegistry::new();
        let pv = spec("PV");
        assert_eq!(registry.known_type_name("PV"), None);

        let sentinel = Value::NotCalculated(NotCalculated::MissingInputs);
        assert_eq!(
            registry.converter_for(&pv, &sentinel).type_name(),
            "NOT_CALCULATED"
        );
        assert_eq!(registry.known_type_name("PV"), None);

        registry.converter_for(&pv, &Value::Number(1.5));
        assert_eq!(registry.known_type_name("PV"), Some("DOUBLE"));
        assert_eq!(
            registry.convert_for_display(&pv, &sentinel, ConversionMode::Summary),
            Ok(JsonValue::String("Missing inputs".into()))
        );
    }

    #[test]
    fn mismatched_kind_is_an_error() {
        let registry = ConverterRegistry::new();
        let pv = spec("PV");
        registry.converter_for(&pv, &Value::Number(1.0));
        let err = registry
            .convert_for_display(&pv, &Value::from("oops"), ConversionMode::Summary)
            .unwrap_err();
        assert_eq!(
            err,
            ConversionError::UnexpectedKind {
                converter: "DOUBLE",
                found: ValueKind::Text,
            }
        );
    }

    #[test]
    fn non_finite_numbers_do_not_convert() {
        let registry = ConverterRegistry::new();
        let result = registry.convert_for_display(
            &spec("PV"),
            &Value::Number(f64::NAN),
            ConversionMode::Summary,
        );
        assert!(matches!(result, Err(ConversionError::NotRepresentable(_))));
    }

    #[test]
    fn vector_modes() {
        let registry = ConverterRegistry::new();
        let curve = spec("Curve");
        let value = Value::Vector(vec![1.0, 2.0]);
        assert_eq!(
            registry.convert_for_display(&curve, &value, ConversionMode::Summary),
            Ok(json!({ "summary": "Vector (2)" }))
        );
        assert_eq!(
            registry.convert_for_display(&curve, &value, ConversionMode::Full),
            Ok(json!({ "summary": "Vector (2)", "detail": [1.0, 2.0] }))
        );
    }

    #[test]
    fn override_wins() {
        let registry =
            ConverterRegistry::new().with_override("Label", Arc::new(StringConverter));
        assert_eq!(registry.known_type_name("Label"), Some("STRING"));
        assert!(
            registry
                .convert_for_display(&spec("Label"), &Value::Int(3), ConversionMode::Summary)
                .is_err()
        );
    }
}
