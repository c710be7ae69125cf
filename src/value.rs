//! Scalar value support: ranges, discrete tables, validity checks.
//!
//! One generic `ValueDef<T>` covers the Double/Int/String item variants;
//! exactly one of {discrete table, range, free value} governs validity,
//! and the setters enforce that exclusivity.

use serde::{Deserialize, Serialize};

use crate::manager::DefKey;

/// The scalar kinds a value-bearing item can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Double,
    Int,
    String,
}

impl ValueKind {
    /// Tag name used by the XML dialect.
    pub fn tag(self) -> &'static str {
        match self {
            ValueKind::Double => "Double",
            ValueKind::Int => "Int",
            ValueKind::String => "String",
        }
    }
}

/// Scalar types usable in a `ValueDef`.
///
/// `PartialOrd` gives numeric ranges for doubles/ints and lexicographic
/// ranges for strings; `Display`/`FromStr` give the wire form.
pub trait ValueScalar:
    Clone + PartialEq + PartialOrd + std::fmt::Display + std::str::FromStr
{
    const KIND: ValueKind;
}

impl ValueScalar for f64 {
    const KIND: ValueKind = ValueKind::Double;
}

impl ValueScalar for i64 {
    const KIND: ValueKind = ValueKind::Int;
}

impl ValueScalar for String {
    const KIND: ValueKind = ValueKind::String;
}

/// One end of a range, with its inclusivity flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound<T> {
    pub value: T,
    pub inclusive: bool,
}

/// A min/max range; either end may be open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueRange<T> {
    pub min: Option<Bound<T>>,
    pub max: Option<Bound<T>>,
}

impl<T: PartialOrd> ValueRange<T> {
    pub fn contains(&self, v: &T) -> bool {
        if let Some(min) = &self.min {
            let ok = if min.inclusive { *v >= min.value } else { *v > min.value };
            if !ok {
                return false;
            }
        }
        if let Some(max) = &self.max {
            let ok = if max.inclusive { *v <= max.value } else { *v < max.value };
            if !ok {
                return false;
            }
        }
        true
    }
}

/// One row of a discrete-value table: the value and its display label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteEntry<T> {
    pub value: T,
    pub label: String,
}

/// Schema for one value-bearing item variant.
#[derive(Debug, Clone)]
pub struct ValueDef<T: ValueScalar> {
    /// Number of value slots; 0 means unbounded (resizable at runtime).
    pub required_count: usize,
    pub default: Option<T>,
    pub default_discrete_index: Option<usize>,
    pub units: Option<String>,
    /// Definition whose attributes may substitute for a literal value.
    pub expr_def: Option<DefKey>,
    discrete: Vec<DiscreteEntry<T>>,
    range: Option<ValueRange<T>>,
}

impl<T: ValueScalar> Default for ValueDef<T> {
    fn default() -> Self {
        ValueDef {
            required_count: 1,
            default: None,
            default_discrete_index: None,
            units: None,
            expr_def: None,
            discrete: Vec::new(),
            range: None,
        }
    }
}

impl<T: ValueScalar> ValueDef<T> {
    pub fn discrete(&self) -> &[DiscreteEntry<T>] {
        &self.discrete
    }

    pub fn is_discrete(&self) -> bool {
        !self.discrete.is_empty()
    }

    pub fn range(&self) -> Option<&ValueRange<T>> {
        self.range.as_ref()
    }

    /// Append a discrete entry. Rejected when a range is already set.
    pub fn add_discrete_entry(&mut self, value: T, label: impl Into<String>) -> bool {
        if self.range.is_some() {
            return false;
        }
        self.discrete.push(DiscreteEntry {
            value,
            label: label.into(),
        });
        true
    }

    /// Install a range. Rejected when a discrete table is already set.
    pub fn set_range(&mut self, range: ValueRange<T>) -> bool {
        if !self.discrete.is_empty() {
            return false;
        }
        self.range = Some(range);
        true
    }

    pub fn allows_expressions(&self) -> bool {
        self.expr_def.is_some()
    }

    /// Discrete membership if discrete, range check if ranged, else valid.
    pub fn is_value_valid(&self, v: &T) -> bool {
        if !self.discrete.is_empty() {
            return self.discrete.iter().any(|e| e.value == *v);
        }
        match &self.range {
            Some(r) => r.contains(v),
            None => true,
        }
    }

    /// Position of a value in the discrete table, if any.
    pub fn discrete_index_of(&self, v: &T) -> Option<usize> {
        self.discrete.iter().position(|e| e.value == *v)
    }
}
