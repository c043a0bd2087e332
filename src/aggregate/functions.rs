//! Aggregate function contract and the built-in functions
//!
//! Stored functions (SUM, COUNT, SUMSQ, MIN, MAX) keep their own state inside
//! an [`Aggregation`]. Dependent functions (AVG, VARIANCE, STDDEV) keep no
//! state and compute their value from other functions, looked up by name in
//! the registry when the value is read.

use std::fmt;

use super::registry::AggregateFunctionRegistry;
use super::state::{AggregateState, Aggregation, SliceOperation};
use crate::error::{CubeError, CubeResult};

pub const SUM: &str = "SUM";
pub const COUNT: &str = "COUNT";
pub const SUMSQ: &str = "SUMSQ";
pub const MIN: &str = "MIN";
pub const MAX: &str = "MAX";
pub const AVG: &str = "AVG";
pub const VARIANCE: &str = "VARIANCE";
pub const STDDEV: &str = "STDDEV";

/// Rollup contract of one aggregate function
pub trait AggregateFunction: fmt::Debug + Send + Sync {
    /// Name the function is registered under; lookups ignore case
    fn name(&self) -> &str;

    /// Fold one raw observation into the aggregation
    fn apply(&self, aggregation: &mut Aggregation, fact: f64) -> CubeResult<()>;

    /// Fold a partial state into an accumulator.
    ///
    /// ADD is commutative and associative. COMPLEMENT computes
    /// `accumulator - source` and must only be called when
    /// [`supports_complement`](Self::supports_complement) is true.
    fn merge(
        &self,
        accumulator: &mut Aggregation,
        source: &Aggregation,
        op: SliceOperation,
    ) -> CubeResult<()>;

    /// Externally visible value, `None` when undefined
    fn value(
        &self,
        aggregation: &Aggregation,
        registry: &AggregateFunctionRegistry,
    ) -> CubeResult<Option<f64>>;

    fn supports_complement(&self) -> bool;

    /// Functions whose state this function reads
    fn dependencies(&self) -> &[&'static str] {
        &[]
    }
}

fn not_invertible(function: &str) -> CubeError {
    CubeError::UnsupportedOperation(format!("COMPLEMENT is not defined for {}", function))
}

// Invertible scalar folding shared by SUM and SUMSQ
fn merge_scalar(
    key: &str,
    accumulator: &mut Aggregation,
    source: &Aggregation,
    op: SliceOperation,
) {
    let Some(src) = source.scalar(key) else {
        return;
    };
    let acc = accumulator.scalar(key).unwrap_or(0.0);
    let merged = match op {
        SliceOperation::Add => acc + src,
        SliceOperation::Complement => acc - src,
    };
    accumulator.set(key, AggregateState::Scalar(merged));
}

#[derive(Debug, Default)]
pub struct Sum;

impl AggregateFunction for Sum {
    fn name(&self) -> &str {
        SUM
    }

    fn apply(&self, aggregation: &mut Aggregation, fact: f64) -> CubeResult<()> {
        let acc = aggregation.scalar(SUM).unwrap_or(0.0);
        aggregation.set(SUM, AggregateState::Scalar(acc + fact));
        Ok(())
    }

    fn merge(
        &self,
        accumulator: &mut Aggregation,
        source: &Aggregation,
        op: SliceOperation,
    ) -> CubeResult<()> {
        merge_scalar(SUM, accumulator, source, op);
        Ok(())
    }

    fn value(&self, aggregation: &Aggregation, _: &AggregateFunctionRegistry) -> CubeResult<Option<f64>> {
        Ok(aggregation.scalar(SUM))
    }

    fn supports_complement(&self) -> bool {
        true
    }
}

/// Sum of squares, kept so that VARIANCE can be rolled up
#[derive(Debug, Default)]
pub struct SumSq;

impl AggregateFunction for SumSq {
    fn name(&self) -> &str {
        SUMSQ
    }

    fn apply(&self, aggregation: &mut Aggregation, fact: f64) -> CubeResult<()> {
        let acc = aggregation.scalar(SUMSQ).unwrap_or(0.0);
        aggregation.set(SUMSQ, AggregateState::Scalar(acc + fact * fact));
        Ok(())
    }

    fn merge(
        &self,
        accumulator: &mut Aggregation,
        source: &Aggregation,
        op: SliceOperation,
    ) -> CubeResult<()> {
        merge_scalar(SUMSQ, accumulator, source, op);
        Ok(())
    }

    fn value(&self, aggregation: &Aggregation, _: &AggregateFunctionRegistry) -> CubeResult<Option<f64>> {
        Ok(aggregation.scalar(SUMSQ))
    }

    fn supports_complement(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
pub struct Count;

impl AggregateFunction for Count {
    fn name(&self) -> &str {
        COUNT
    }

    fn apply(&self, aggregation: &mut Aggregation, _fact: f64) -> CubeResult<()> {
        let acc = aggregation.count(COUNT).unwrap_or(0);
        aggregation.set(COUNT, AggregateState::Count(acc + 1));
        Ok(())
    }

    fn merge(
        &self,
        accumulator: &mut Aggregation,
        source: &Aggregation,
        op: SliceOperation,
    ) -> CubeResult<()> {
        let Some(src) = source.count(COUNT) else {
            return Ok(());
        };
        let acc = accumulator.count(COUNT).unwrap_or(0);
        let merged = match op {
            SliceOperation::Add => acc + src,
            SliceOperation::Complement => acc - src,
        };
        accumulator.set(COUNT, AggregateState::Count(merged));
        Ok(())
    }

    fn value(&self, aggregation: &Aggregation, _: &AggregateFunctionRegistry) -> CubeResult<Option<f64>> {
        Ok(aggregation.count(COUNT).map(|c| c as f64))
    }

    fn supports_complement(&self) -> bool {
        true
    }
}

/// MIN or MAX. Neither can be un-merged, so COMPLEMENT is refused.
#[derive(Debug)]
pub struct Extremum {
    name: &'static str,
    keep_lower: bool,
}

impl Extremum {
    pub fn min() -> Self {
        Self {
            name: MIN,
            keep_lower: true,
        }
    }

    pub fn max() -> Self {
        Self {
            name: MAX,
            keep_lower: false,
        }
    }

    fn pick(&self, a: f64, b: f64) -> f64 {
        if self.keep_lower {
            a.min(b)
        } else {
            a.max(b)
        }
    }
}

impl AggregateFunction for Extremum {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, aggregation: &mut Aggregation, fact: f64) -> CubeResult<()> {
        let next = match aggregation.scalar(self.name) {
            Some(current) => self.pick(current, fact),
            None => fact,
        };
        aggregation.set(self.name, AggregateState::Scalar(next));
        Ok(())
    }

    fn merge(
        &self,
        accumulator: &mut Aggregation,
        source: &Aggregation,
        op: SliceOperation,
    ) -> CubeResult<()> {
        if op == SliceOperation::Complement {
            return Err(not_invertible(self.name));
        }
        if let Some(src) = source.scalar(self.name) {
            self.apply(accumulator, src)?;
        }
        Ok(())
    }

    fn value(&self, aggregation: &Aggregation, _: &AggregateFunctionRegistry) -> CubeResult<Option<f64>> {
        Ok(aggregation.scalar(self.name))
    }

    fn supports_complement(&self) -> bool {
        false
    }
}

/// AVG = SUM / COUNT
#[derive(Debug, Default)]
pub struct Avg;

impl AggregateFunction for Avg {
    fn name(&self) -> &str {
        AVG
    }

    fn apply(&self, _: &mut Aggregation, _: f64) -> CubeResult<()> {
        Ok(())
    }

    fn merge(&self, _: &mut Aggregation, _: &Aggregation, _: SliceOperation) -> CubeResult<()> {
        Ok(())
    }

    fn value(
        &self,
        aggregation: &Aggregation,
        registry: &AggregateFunctionRegistry,
    ) -> CubeResult<Option<f64>> {
        let sum = registry.value(SUM, aggregation)?;
        let count = registry.value(COUNT, aggregation)?;
        Ok(match (sum, count) {
            (Some(sum), Some(count)) if count != 0.0 => Some(sum / count),
            _ => None,
        })
    }

    fn supports_complement(&self) -> bool {
        true
    }

    fn dependencies(&self) -> &[&'static str] {
        &[SUM, COUNT]
    }
}

/// Population variance, SUMSQ / COUNT - AVG^2
#[derive(Debug, Default)]
pub struct Variance;

impl AggregateFunction for Variance {
    fn name(&self) -> &str {
        VARIANCE
    }

    fn apply(&self, _: &mut Aggregation, _: f64) -> CubeResult<()> {
        Ok(())
    }

    fn merge(&self, _: &mut Aggregation, _: &Aggregation, _: SliceOperation) -> CubeResult<()> {
        Ok(())
    }

    fn value(
        &self,
        aggregation: &Aggregation,
        registry: &AggregateFunctionRegistry,
    ) -> CubeResult<Option<f64>> {
        let sum_sq = registry.value(SUMSQ, aggregation)?;
        let count = registry.value(COUNT, aggregation)?;
        let avg = registry.value(AVG, aggregation)?;
        Ok(match (sum_sq, count, avg) {
            (Some(sum_sq), Some(count), Some(avg)) if count != 0.0 => {
                // Rounding can push a zero variance slightly below zero
                Some((sum_sq / count - avg * avg).max(0.0))
            }
            _ => None,
        })
    }

    fn supports_complement(&self) -> bool {
        true
    }

    fn dependencies(&self) -> &[&'static str] {
        &[SUMSQ, COUNT, AVG]
    }
}

#[derive(Debug, Default)]
pub struct StdDev;

impl AggregateFunction for StdDev {
    fn name(&self) -> &str {
        STDDEV
    }

    fn apply(&self, _: &mut Aggregation, _: f64) -> CubeResult<()> {
        Ok(())
    }

    fn merge(&self, _: &mut Aggregation, _: &Aggregation, _: SliceOperation) -> CubeResult<()> {
        Ok(())
    }

    fn value(
        &self,
        aggregation: &Aggregation,
        registry: &AggregateFunctionRegistry,
    ) -> CubeResult<Option<f64>> {
        Ok(registry.value(VARIANCE, aggregation)?.map(f64::sqrt))
    }

    fn supports_complement(&self) -> bool {
        true
    }

    fn dependencies(&self) -> &[&'static str] {
        &[VARIANCE]
    }
}
