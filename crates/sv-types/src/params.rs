//! Parameter values, ordered parameter sets and the search scope.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A concrete parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// An ordered collection of named parameter values.
///
/// Names are unique: setting an existing name replaces its value in place,
/// keeping the original position. Serialized as a JSON object in insertion
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    entries: IndexMap<String, ParameterValue>,
}

/// One candidate configuration drawn from a [`ParameterScope`].
pub type ParameterCombination = ParameterSet;

impl ParameterSet {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.entries.get(name)
    }

    /// Apply `overrides` on top of `self`. Overrides always win.
    pub fn merged(mut self, overrides: &ParameterSet) -> Self {
        for (name, value) in overrides.iter() {
            self.set(name, value.clone());
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

impl<N: Into<String>, V: Into<ParameterValue>> FromIterator<(N, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut set = ParameterSet::new();
        for (name, value) in iter {
            set.set(name, value);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// The full search scope: an ordered map from parameter name to its
/// candidate values. Serialized as `{"name": [values...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterScope {
    axes: IndexMap<String, Vec<ParameterValue>>,
}

impl ParameterScope {
    pub fn new() -> Self {
        Self {
            axes: IndexMap::new(),
        }
    }

    /// Add a parameter, or replace the values of an existing one in place.
    pub fn add<V: Into<ParameterValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.axes.insert(name.into(), values);
        self
    }

    /// Parameter names in scope order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.axes.keys().map(String::as_str)
    }

    pub fn values(&self, name: &str) -> Option<&[ParameterValue]> {
        self.axes.get(name).map(Vec::as_slice)
    }

    /// Number of combinations in the Cartesian product.
    pub fn grid_size(&self) -> Option<usize> {
        self.axes
            .values()
            .try_fold(1usize, |total, values| total.checked_mul(values.len()))
    }

    /// Expand the scope into its Cartesian product. The first parameter
    /// varies slowest. An empty scope yields a single empty combination.
    pub fn combinations(&self) -> Vec<ParameterCombination> {
        let mut result: Vec<ParameterCombination> = vec![ParameterSet::new()];
        for (name, values) in &self.axes {
            let mut next = Vec::with_capacity(result.len() * values.len());
            for existing in &result {
                for value in values {
                    let mut combo = existing.clone();
                    combo.set(name.clone(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }
        result
    }
}

/// A combination paired with the score it obtained in the latest round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCombination {
    pub parameters: ParameterCombination,
    pub score: f64,
}

impl ScoredCombination {
    /// A freshly generated candidate with the placeholder score.
    pub fn unscored(parameters: ParameterCombination) -> Self {
        Self {
            parameters,
            score: 0.0,
        }
    }
}
