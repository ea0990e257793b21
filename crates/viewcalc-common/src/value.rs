use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sentinel stored in place of a value that could not be produced.
///
/// Sentinels live in the computation cache and in result models exactly like
/// real values, so consumers can tell "failed" apart from "never requested".
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NotCalculated {
    /// The producing function failed.
    EvaluationError,
    /// One or more inputs were absent or themselves not calculated.
    MissingInputs,
}

impl Display for NotCalculated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EvaluationError => "Evaluation error",
            Self::MissingInputs => "Missing inputs",
        })
    }
}

/// A computed (or sourced) value.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Int(i64),
    Text(String),
    Boolean(bool),
    Vector(Vec<f64>),
    NotCalculated(NotCalculated),
}

/// Runtime type of a [`Value`], used to pick converters and infer column types.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Number,
    Int,
    Text,
    Boolean,
    Vector,
    NotCalculated,
}

impl ValueKind {
    /// Kinds whose successive values are worth keeping as history.
    pub fn keeps_history(self) -> bool {
        matches!(self, Self::Number | Self::Int)
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Number(_) => ValueKind::Number,
            Value::Int(_) => ValueKind::Int,
            Value::Text(_) => ValueKind::Text,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Vector(_) => ValueKind::Vector,
            Value::NotCalculated(_) => ValueKind::NotCalculated,
        }
    }

    pub fn is_not_calculated(&self) -> bool {
        matches!(self, Value::NotCalculated(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Vector(v) => write!(f, "Vector ({})", v.len()),
            Value::NotCalculated(nc) => write!(f, "{nc}"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<NotCalculated> for Value {
    fn from(nc: NotCalculated) -> Self {
        Value::NotCalculated(nc)
    }
}
