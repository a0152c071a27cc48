//! Types module: value types shared by the SQON AST and the filter compiler.
//!
//! This module provides operands, numeric bounds, composite values and the
//! `and`/`or` combinator.

use serde::{Serialize, Deserialize};
use serde_json::{Number, Value};

/// Set semantics of a categorical filter over its values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operand {
    /// Union: at least one value matches.
    #[default]
    One,
    /// Intersection: every value matches.
    All,
    /// Exclusion: no value matches.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Gte => ">=",
            Comparator::Lte => "<=",
        }
    }
}

/// One side of a numeric range.
///
/// The value is kept as a JSON number so integer bounds are emitted as integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub comparator: Comparator,
    pub value: Number,
}

impl Bound {
    pub fn new(comparator: Comparator, value: impl Into<Number>) -> Self {
        Self { comparator, value: value.into() }
    }
}

/// A composite filter value: a score bound, or a bare categorical call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, deny_unknown_fields)]
pub enum CompositeValue {
    Score(Bound),
    Call { value: Value },
}

/// Combinator between two operands of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtypeKind {
    Generic,
    Genericbool,
}

/// Declares which filter semantics an autocomplete selection follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtype {
    #[serde(rename = "type")]
    pub kind: SubtypeKind,
    #[serde(default)]
    pub operand: Operand,
}

/// True for values a term clause can carry.
pub(crate) fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}
