//! Composed query cursor
//!
//! ```text
//! ScanSpec[] -> FilteringScanner[]      (opened in parallel)
//!            -> GroupingIterator[]      (per scan, row operation)
//!            -> NWayMergingIterator     (ordered by group key)
//!            -> GroupingIterator        (across cuboids, ADD)
//! ```

use rayon::prelude::*;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use super::grouping::RawResultGrouping;
use super::raw_result::RawResult;
use crate::aggregate::{AggregateFunctionRegistry, Aggregation, SliceOperation};
use crate::error::{CubeError, CubeResult};
use crate::model::{Cuboid, Member};
use crate::scan::{FilteringScanner, ScanSpec};
use crate::storage::CubeStore;
use crate::stream::{GroupingIterator, HeapMergeStrategy, InputIterator, NWayMergingIterator};

type ScanGroups = GroupingIterator<FilteringScanner, RawResultGrouping>;
type GroupOrder = fn(&RawResult, &RawResult) -> Ordering;
type MergedGroups = NWayMergingIterator<ScanGroups, HeapMergeStrategy<GroupOrder>>;

fn by_group(a: &RawResult, b: &RawResult) -> Ordering {
    a.group.cmp(&b.group)
}

/// Ordered cursor over the aggregated groups of one query
pub struct ResultSet {
    groups: GroupingIterator<MergedGroups, RawResultGrouping>,
    registry: Arc<AggregateFunctionRegistry>,
    /// Decodes group members; every scan groups on the same key prefix
    cuboid: Arc<Cuboid>,
    measures: Vec<String>,
    functions: Arc<Vec<usize>>,
    /// Values read from the current row
    cache: RefCell<HashMap<(usize, String), Option<f64>>>,
    /// A call failed and every scanner has been closed
    failed: bool,
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("cuboid", &self.cuboid.name())
            .field("measures", &self.measures)
            .field("functions", &self.functions)
            .finish()
    }
}

impl ResultSet {
    /// Validate every scan, open the scanners on `pool` and compose the cursor.
    ///
    /// `functions` restricts folding to the named functions and their
    /// dependencies; `None` folds every registered function.
    pub fn open(
        store: &CubeStore,
        registry: Arc<AggregateFunctionRegistry>,
        pool: &rayon::ThreadPool,
        specs: &[ScanSpec],
        functions: Option<&[String]>,
        batch_size: usize,
    ) -> CubeResult<Self> {
        let first = specs
            .first()
            .ok_or_else(|| CubeError::malformed("Query has no scans"))?;
        let cuboids = specs
            .iter()
            .map(|spec| {
                let cuboid = store.cuboid(&spec.cuboid)?;
                spec.validate(&cuboid)?;
                if spec.measures != first.measures || spec.group_key_len != first.group_key_len {
                    return Err(CubeError::malformed(format!(
                        "Scan of '{}' does not share measures and group key with '{}'",
                        spec.cuboid, first.cuboid
                    )));
                }
                Ok(cuboid)
            })
            .collect::<CubeResult<Vec<_>>>()?;

        let resolved = match functions {
            Some(names) => registry.resolve_subset(names)?,
            None => registry.resolve_all(),
        };
        if specs
            .iter()
            .any(|s| s.operation == SliceOperation::Complement)
        {
            registry.check_complement(&resolved)?;
        }
        let functions = Arc::new(resolved);

        let scanners = open_scanners(store, pool, specs, &cuboids, batch_size)?;
        let measure_count = first.measures.len();
        let per_scan = scanners
            .into_iter()
            .map(|scanner| {
                let cuboid = scanner.cuboid().to_string();
                let strategy = RawResultGrouping::per_scan(
                    registry.clone(),
                    functions.clone(),
                    measure_count,
                    cuboid,
                );
                GroupingIterator::new(scanner, strategy)
            })
            .collect();

        let merged = NWayMergingIterator::new(per_scan, HeapMergeStrategy::new(by_group as GroupOrder));
        let strategy =
            RawResultGrouping::cross_cuboid(registry.clone(), functions.clone(), measure_count);

        Ok(Self {
            groups: GroupingIterator::new(merged, strategy),
            registry,
            cuboid: cuboids[0].clone(),
            measures: first.measures.clone(),
            functions,
            cache: RefCell::new(HashMap::new()),
            failed: false,
        })
    }

    pub fn measures(&self) -> &[String] {
        &self.measures
    }

    fn check_usable(&self) -> CubeResult<()> {
        if self.failed {
            return Err(CubeError::protocol("result set used after a failed call"));
        }
        Ok(())
    }

    /// Close every scanner and keep the cursor failed; returns `error`
    fn terminate(&mut self, error: CubeError) -> CubeError {
        self.failed = true;
        self.cache.borrow_mut().clear();
        if let Err(e) = self.groups.close() {
            tracing::warn!("Failed to close scanners after query error: {}", e);
        }
        tracing::debug!("Query on {} terminated: {}", self.cuboid.name(), error);
        error
    }

    pub fn has_next(&mut self) -> CubeResult<bool> {
        self.check_usable()?;
        self.groups.has_next().map_err(|e| self.terminate(e))
    }

    /// Move to the next group. A failure ends the cursor: scanners are
    /// closed and every later call errors. Rows already read stay valid.
    pub fn next(&mut self) -> CubeResult<()> {
        self.check_usable()?;
        self.cache.borrow_mut().clear();
        self.groups.next().map_err(|e| self.terminate(e))
    }

    pub fn current(&self) -> CubeResult<ResultRow<'_>> {
        self.check_usable()?;
        Ok(ResultRow {
            result: self.groups.current()?,
            set: self,
        })
    }

    /// Close every scanner, last opened first
    pub fn close(&mut self) -> CubeResult<()> {
        self.cache.borrow_mut().clear();
        self.groups.close()
    }
}

/// Open one scanner per spec on the pool, closing the opened ones if any fails
fn open_scanners(
    store: &CubeStore,
    pool: &rayon::ThreadPool,
    specs: &[ScanSpec],
    cuboids: &[Arc<Cuboid>],
    batch_size: usize,
) -> CubeResult<Vec<FilteringScanner>> {
    let opened: Vec<CubeResult<FilteringScanner>> = pool.install(|| {
        specs
            .par_iter()
            .zip(cuboids.par_iter())
            .map(|(spec, cuboid)| FilteringScanner::open(store, cuboid, spec, batch_size))
            .collect()
    });

    let mut scanners = Vec::with_capacity(opened.len());
    let mut errors = Vec::new();
    for result in opened {
        match result {
            Ok(scanner) => scanners.push(scanner),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        tracing::debug!("Opened {} scanner(s)", scanners.len());
        return Ok(scanners);
    }

    tracing::warn!(
        "{} of {} scanner(s) failed to open",
        errors.len(),
        specs.len()
    );
    for scanner in scanners.iter_mut().rev() {
        if let Err(e) = scanner.close() {
            tracing::warn!("Failed to close scanner after fan-out failure: {}", e);
        }
    }
    Err(CubeError::ScanFanOut(errors))
}

/// View of the current result row
pub struct ResultRow<'a> {
    result: &'a RawResult,
    set: &'a ResultSet,
}

impl<'a> ResultRow<'a> {
    pub fn group_key(&self) -> &[u8] {
        &self.result.group
    }

    pub fn aggregation(&self, measure: &str) -> CubeResult<&'a Aggregation> {
        let index = self.measure_index(measure)?;
        Ok(&self.result.measures[index])
    }

    fn measure_index(&self, measure: &str) -> CubeResult<usize> {
        self.set
            .measures
            .iter()
            .position(|m| m == measure)
            .ok_or_else(|| CubeError::malformed(format!("Measure '{}' was not queried", measure)))
    }

    /// Value of `function` over `measure`, `None` when undefined.
    ///
    /// The value is cached until the cursor moves.
    pub fn double_aggregate(&self, measure: &str, function: &str) -> CubeResult<Option<f64>> {
        let index = self.measure_index(measure)?;
        let function = function.to_ascii_uppercase();
        if let Some(value) = self.set.cache.borrow().get(&(index, function.clone())) {
            return Ok(*value);
        }

        let registry = &self.set.registry;
        if !registry.is_resolved(&self.set.functions, &function)? {
            return Err(CubeError::malformed(format!(
                "Function {} was not folded by this query",
                function
            )));
        }
        let value = registry.value(&function, &self.result.measures[index])?;
        self.set.cache.borrow_mut().insert((index, function), value);
        Ok(value)
    }

    /// Decode a grouped dimension from the group key
    pub fn group_member(&self, dimension: &str) -> CubeResult<Member> {
        self.set.cuboid.decode_member(&self.result.group, dimension)
    }
}
