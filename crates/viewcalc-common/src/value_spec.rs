//! Identity of computable quantities.
//!
//! - **`ValueProperties`**  : sorted, duplicate-free key→value constraints
//! - **`ValueSpec`**        : fully qualified identity of one produced value
//! - **`ValueRequirement`** : a request for a value, possibly looser than a spec
//!
//! All three are immutable and cheap to clone; specs are the keys of the
//! computation cache and the edges of the dependency graph.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ValueError;
use crate::target::TargetRef;

/// Well-known property names.
pub mod property_names {
    pub const FUNCTION: &str = "Function";
    pub const CURRENCY: &str = "Currency";
}

/// Immutable set of key→value constraints. Key order is irrelevant.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ValueProperties(Arc<BTreeMap<String, String>>);

impl ValueProperties {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn builder() -> ValuePropertiesBuilder {
        ValuePropertiesBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if every constraint in `self` is present with the same value in `other`.
    pub fn is_satisfied_by(&self, other: &ValueProperties) -> bool {
        self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl Display for ValueProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Default)]
pub struct ValuePropertiesBuilder {
    entries: Vec<(String, String)>,
}

impl ValuePropertiesBuilder {
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<ValueProperties, ValueError> {
        let mut map = BTreeMap::new();
        for (k, v) in self.entries {
            if map.contains_key(&k) {
                return Err(ValueError::DuplicateProperty(k));
            }
            map.insert(k, v);
        }
        Ok(ValueProperties(Arc::new(map)))
    }
}

/// Fully qualified identity of one computable quantity.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueSpec {
    value_name: Arc<str>,
    target: TargetRef,
    properties: ValueProperties,
}

impl ValueSpec {
    pub fn new(
        value_name: impl Into<Arc<str>>,
        target: TargetRef,
        properties: ValueProperties,
    ) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            properties,
        }
    }

    pub fn value_name(&self) -> &str {
        &self.value_name
    }

    pub fn target(&self) -> &TargetRef {
        &self.target
    }

    pub fn properties(&self) -> &ValueProperties {
        &self.properties
    }

    /// Whether this specification can satisfy `requirement`.
    pub fn satisfies(&self, requirement: &ValueRequirement) -> bool {
        self.value_name() == requirement.value_name()
            && &self.target == requirement.target()
            && requirement.constraints().is_satisfied_by(&self.properties)
    }
}

impl Display for ValueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]{}", self.value_name, self.target, self.properties)
    }
}

/// A request for a value, possibly with looser constraints than any spec.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRequirement {
    value_name: Arc<str>,
    target: TargetRef,
    constraints: ValueProperties,
}

impl ValueRequirement {
    pub fn new(
        value_name: impl Into<Arc<str>>,
        target: TargetRef,
        constraints: ValueProperties,
    ) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            constraints,
        }
    }

    pub fn value_name(&self) -> &str {
        &self.value_name
    }

    pub fn target(&self) -> &TargetRef {
        &self.target
    }

    pub fn constraints(&self) -> &ValueProperties {
        &self.constraints
    }
}

impl From<&ValueSpec> for ValueRequirement {
    fn from(spec: &ValueSpec) -> Self {
        Self {
            value_name: spec.value_name.clone(),
            target: spec.target.clone(),
            constraints: spec.properties.clone(),
        }
    }
}

impl Display for ValueRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]{}", self.value_name, self.target, self.constraints)
    }
}
