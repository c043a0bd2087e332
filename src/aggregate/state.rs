use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::CubeResult;

/// How a partial aggregate is folded into an accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SliceOperation {
    #[default]
    Add,
    /// Subtract the source from the accumulator (A \ B)
    Complement,
}

impl fmt::Display for SliceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceOperation::Add => write!(f, "ADD"),
            SliceOperation::Complement => write!(f, "COMPLEMENT"),
        }
    }
}

/// One function's partial state inside an [`Aggregation`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AggregateState {
    Scalar(f64),
    Count(i64),
}

/// Partial aggregation of one measure.
///
/// Holds one state per stored function, keyed by function name. A missing
/// entry means "undefined", which is different from zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    states: BTreeMap<String, AggregateState>,
}

impl Aggregation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear for reuse, keeping the allocation
    pub fn reset(&mut self) {
        self.states.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, function: &str) -> Option<AggregateState> {
        self.states.get(function).copied()
    }

    pub fn scalar(&self, function: &str) -> Option<f64> {
        match self.states.get(function)? {
            AggregateState::Scalar(v) => Some(*v),
            AggregateState::Count(c) => Some(*c as f64),
        }
    }

    pub fn count(&self, function: &str) -> Option<i64> {
        match self.states.get(function)? {
            AggregateState::Count(c) => Some(*c),
            AggregateState::Scalar(v) => Some(*v as i64),
        }
    }

    pub fn set(&mut self, function: &str, state: AggregateState) {
        match self.states.get_mut(function) {
            Some(slot) => *slot = state,
            None => {
                self.states.insert(function.to_string(), state);
            }
        }
    }

    pub fn states(&self) -> impl Iterator<Item = (&str, AggregateState)> {
        self.states.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn to_bytes(&self) -> CubeResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> CubeResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
