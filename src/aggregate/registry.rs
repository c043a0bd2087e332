use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::functions::{AggregateFunction, Avg, Count, Extremum, StdDev, Sum, SumSq, Variance};
use super::state::{Aggregation, SliceOperation};
use crate::error::{CubeError, CubeResult};

/// Name to function lookup, built once per engine and shared by reference
#[derive(Default, Clone)]
pub struct AggregateFunctionRegistry {
    functions: Vec<Arc<dyn AggregateFunction>>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for AggregateFunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateFunctionRegistry")
            .field("functions", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl AggregateFunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// SUM, COUNT, SUMSQ, MIN, MAX, AVG, VARIANCE and STDDEV
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let builtins: Vec<Arc<dyn AggregateFunction>> = vec![
            Arc::new(Sum),
            Arc::new(Count),
            Arc::new(SumSq),
            Arc::new(Extremum::min()),
            Arc::new(Extremum::max()),
            Arc::new(Avg),
            Arc::new(Variance),
            Arc::new(StdDev),
        ];
        for function in builtins {
            registry.functions.push(function.clone());
            registry
                .index
                .insert(function.name().to_string(), registry.functions.len() - 1);
        }
        registry
    }

    pub fn register(&mut self, function: Arc<dyn AggregateFunction>) -> CubeResult<()> {
        let name = function.name().to_ascii_uppercase();
        if self.index.contains_key(&name) {
            return Err(CubeError::malformed(format!(
                "Aggregate function '{}' is already registered",
                name
            )));
        }
        self.functions.push(function);
        self.index.insert(name, self.functions.len() - 1);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.name())
    }

    fn position(&self, name: &str) -> CubeResult<usize> {
        self.index
            .get(name)
            .or_else(|| self.index.get(&name.to_ascii_uppercase()))
            .copied()
            .ok_or_else(|| CubeError::malformed(format!("Unknown aggregate function '{}'", name)))
    }

    pub fn get(&self, name: &str) -> CubeResult<&Arc<dyn AggregateFunction>> {
        Ok(&self.functions[self.position(name)?])
    }

    /// Fold one raw observation into every function
    pub fn apply_all(&self, aggregation: &mut Aggregation, fact: f64) -> CubeResult<()> {
        for function in &self.functions {
            function.apply(aggregation, fact)?;
        }
        Ok(())
    }

    /// Merge through every registered function
    pub fn merge_all(
        &self,
        accumulator: &mut Aggregation,
        source: &Aggregation,
        op: SliceOperation,
    ) -> CubeResult<()> {
        self.merge_resolved(&self.resolve_all(), accumulator, source, op)
    }

    /// Merge through the named functions and everything they depend on
    pub fn merge_subset<S: AsRef<str>>(
        &self,
        names: &[S],
        accumulator: &mut Aggregation,
        source: &Aggregation,
        op: SliceOperation,
    ) -> CubeResult<()> {
        let resolved = self.resolve_subset(names)?;
        self.merge_resolved(&resolved, accumulator, source, op)
    }

    /// Dependency closure of the named functions, in registration order
    pub fn resolve_subset<S: AsRef<str>>(&self, names: &[S]) -> CubeResult<Vec<usize>> {
        let mut selected = vec![false; self.functions.len()];
        let mut pending: Vec<usize> = names
            .iter()
            .map(|n| self.position(n.as_ref()))
            .collect::<CubeResult<_>>()?;

        while let Some(pos) = pending.pop() {
            if selected[pos] {
                continue;
            }
            selected[pos] = true;
            for dependency in self.functions[pos].dependencies() {
                pending.push(self.position(dependency)?);
            }
        }

        Ok(selected
            .iter()
            .enumerate()
            .filter_map(|(pos, on)| on.then_some(pos))
            .collect())
    }

    /// Every registered function, in registration order
    pub fn resolve_all(&self) -> Vec<usize> {
        (0..self.functions.len()).collect()
    }

    /// Names of a resolved subset
    pub fn resolved_names(&self, resolved: &[usize]) -> Vec<&str> {
        resolved.iter().map(|pos| self.functions[*pos].name()).collect()
    }

    /// Whether `name` (any case) belongs to a resolved subset
    pub fn is_resolved(&self, resolved: &[usize], name: &str) -> CubeResult<bool> {
        let pos = self.position(name)?;
        Ok(resolved.contains(&pos))
    }

    /// Fail unless every function of the subset can be un-merged
    pub fn check_complement(&self, resolved: &[usize]) -> CubeResult<()> {
        match resolved
            .iter()
            .map(|pos| &self.functions[*pos])
            .find(|f| !f.supports_complement())
        {
            Some(function) => Err(CubeError::UnsupportedOperation(format!(
                "COMPLEMENT is not defined for {}",
                function.name()
            ))),
            None => Ok(()),
        }
    }

    /// Merge through an already resolved subset.
    ///
    /// COMPLEMENT is validated for the whole subset before any state changes.
    pub fn merge_resolved(
        &self,
        resolved: &[usize],
        accumulator: &mut Aggregation,
        source: &Aggregation,
        op: SliceOperation,
    ) -> CubeResult<()> {
        if op == SliceOperation::Complement {
            self.check_complement(resolved)?;
        }
        for pos in resolved {
            self.functions[*pos].merge(accumulator, source, op)?;
        }
        Ok(())
    }

    /// Value of one function, `None` when undefined
    pub fn value(&self, name: &str, aggregation: &Aggregation) -> CubeResult<Option<f64>> {
        self.get(name)?.value(aggregation, self)
    }
}
