use std::sync::Arc;

use super::raw_result::RawResult;
use crate::aggregate::{AggregateFunctionRegistry, SliceOperation};
use crate::error::{CubeError, CubeResult};
use crate::stream::GroupingStrategy;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    /// Rows of one scan, folded with their own operation
    PerScan { cuboid: String },
    /// Partial groups of several scans, folded with ADD
    CrossCuboid,
}

/// Groups [`RawResult`]s on byte equality of their group keys
#[derive(Debug, Clone)]
pub struct RawResultGrouping {
    registry: Arc<AggregateFunctionRegistry>,
    /// Functions folded, resolved once per query
    functions: Arc<Vec<usize>>,
    measure_count: usize,
    mode: Mode,
}

impl RawResultGrouping {
    pub fn per_scan(
        registry: Arc<AggregateFunctionRegistry>,
        functions: Arc<Vec<usize>>,
        measure_count: usize,
        cuboid: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            functions,
            measure_count,
            mode: Mode::PerScan {
                cuboid: cuboid.into(),
            },
        }
    }

    pub fn cross_cuboid(
        registry: Arc<AggregateFunctionRegistry>,
        functions: Arc<Vec<usize>>,
        measure_count: usize,
    ) -> Self {
        Self {
            registry,
            functions,
            measure_count,
            mode: Mode::CrossCuboid,
        }
    }
}

impl GroupingStrategy<RawResult> for RawResultGrouping {
    type Group = RawResult;

    fn new_group_holder(&mut self, first: &RawResult, recycled: Option<RawResult>) -> CubeResult<RawResult> {
        let mut holder = recycled.unwrap_or_default();
        holder.reset(self.measure_count);
        holder.set_group(&first.group);
        holder.cuboid.push_str(&first.cuboid);
        Ok(holder)
    }

    fn is_item_in_group(&self, group: &RawResult, item: &RawResult) -> bool {
        group.group == item.group
    }

    fn aggregate(&mut self, group: &mut RawResult, item: &RawResult) -> CubeResult<()> {
        let op = match &self.mode {
            Mode::PerScan { cuboid } if *cuboid != item.cuboid => {
                return Err(CubeError::UnsupportedOperation(format!(
                    "Row from '{}' cannot be folded into a scan of '{}'",
                    item.cuboid, cuboid
                )))
            }
            Mode::PerScan { .. } => item.operation,
            Mode::CrossCuboid => SliceOperation::Add,
        };
        if item.measures.len() != group.measures.len() {
            return Err(CubeError::malformed(format!(
                "Row carries {} measures, group expects {}",
                item.measures.len(),
                group.measures.len()
            )));
        }
        for (acc, src) in group.measures.iter_mut().zip(&item.measures) {
            self.registry.merge_resolved(&self.functions, acc, src, op)?;
        }
        Ok(())
    }
}
