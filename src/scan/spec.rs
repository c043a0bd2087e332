use super::range::Range;
use crate::aggregate::SliceOperation;
use crate::error::{CubeError, CubeResult};
use crate::model::{encode_member, level_by_name, Cuboid, Member};
use crate::storage::keys;

/// Everything needed to run one cuboid scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSpec {
    pub cuboid: String,
    /// One range per cuboid dimension, in key order
    pub ranges: Vec<Range>,
    /// Leading key bytes rows are grouped by
    pub group_key_len: usize,
    pub operation: SliceOperation,
    pub measures: Vec<String>,
}

impl ScanSpec {
    pub fn new(
        cuboid: impl Into<String>,
        ranges: Vec<Range>,
        group_key_len: usize,
        operation: SliceOperation,
        measures: Vec<String>,
    ) -> Self {
        Self {
            cuboid: cuboid.into(),
            ranges,
            group_key_len,
            operation,
            measures,
        }
    }

    /// Concatenated left (or right) bounds of every dimension
    pub fn composite_bound(&self, lower: bool) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.ranges.iter().map(Range::key_len).sum());
        for range in &self.ranges {
            key.extend_from_slice(if lower { range.left() } else { range.right() });
        }
        key
    }

    /// Inclusive scan start
    pub fn start_key(&self) -> Vec<u8> {
        self.composite_bound(true)
    }

    /// Exclusive scan stop, `None` when the upper bound is the last key
    pub fn stop_key(&self) -> Option<Vec<u8>> {
        keys::successor(&self.composite_bound(false))
    }

    /// Check the spec against the cuboid it names
    pub fn validate(&self, cuboid: &Cuboid) -> CubeResult<()> {
        if cuboid.name() != self.cuboid {
            return Err(CubeError::malformed(format!(
                "Scan targets '{}' but was checked against '{}'",
                self.cuboid,
                cuboid.name()
            )));
        }
        if self.ranges.len() != cuboid.dimensions().len() {
            return Err(CubeError::malformed(format!(
                "Cuboid '{}' has {} dimensions, scan has {} ranges",
                self.cuboid,
                cuboid.dimensions().len(),
                self.ranges.len()
            )));
        }
        for (range, dimension) in self.ranges.iter().zip(cuboid.dimensions()) {
            if range.key_len() != dimension.key_len() {
                return Err(CubeError::malformed(format!(
                    "Range for '{}' is {} bytes wide, key is {}",
                    dimension.name(),
                    range.key_len(),
                    dimension.key_len()
                )));
            }
        }
        if self.group_key_len > cuboid.key_len() {
            return Err(CubeError::malformed(format!(
                "Group key of {} bytes exceeds the {}-byte key of '{}'",
                self.group_key_len,
                cuboid.key_len(),
                self.cuboid
            )));
        }
        if self.measures.is_empty() {
            return Err(CubeError::malformed("Scan requests no measures"));
        }
        Ok(())
    }
}

/// Builds a [`ScanSpec`] from dimension names and members.
///
/// Dimensions left unset cover every member of a flat dimension, or only
/// the ALL bucket of a hierarchical one. The first error is kept and
/// returned by [`build`](Self::build).
pub struct ScanSpecBuilder<'a> {
    cuboid: &'a Cuboid,
    ranges: Vec<Option<Range>>,
    group_by: Vec<String>,
    operation: SliceOperation,
    measures: Vec<String>,
    error: Option<CubeError>,
}

impl<'a> ScanSpecBuilder<'a> {
    pub fn new(cuboid: &'a Cuboid) -> Self {
        Self {
            cuboid,
            ranges: vec![None; cuboid.dimensions().len()],
            group_by: Vec::new(),
            operation: SliceOperation::Add,
            measures: Vec::new(),
            error: None,
        }
    }

    fn record<T>(&mut self, result: CubeResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
                None
            }
        }
    }

    fn encoded_range(
        &self,
        dimension: &str,
        level: Option<&str>,
        from: &Member,
        to: &Member,
    ) -> CubeResult<(usize, Range)> {
        let index = self.cuboid.dimension_index(dimension)?;
        let dim = self.cuboid.dimensions()[index].as_ref();
        let level = level.map(|name| level_by_name(dim, name)).transpose()?;
        let left = encode_member(dim, from, level)?;
        let right = encode_member(dim, to, level)?;
        Ok((index, Range::closed(left, right)?))
    }

    /// Closed slice at the deepest level
    pub fn slice(mut self, dimension: &str, from: &Member, to: &Member) -> Self {
        let result = self.encoded_range(dimension, None, from, to);
        if let Some((index, range)) = self.record(result) {
            self.ranges[index] = Some(range);
        }
        self
    }

    /// Closed slice at a named hierarchy level
    pub fn slice_at(mut self, dimension: &str, level: &str, from: &Member, to: &Member) -> Self {
        let result = self.encoded_range(dimension, Some(level), from, to);
        if let Some((index, range)) = self.record(result) {
            self.ranges[index] = Some(range);
        }
        self
    }

    /// Single member at the deepest level
    pub fn member(self, dimension: &str, member: &Member) -> Self {
        self.slice(dimension, member, member)
    }

    /// Single member at a named hierarchy level
    pub fn member_at(self, dimension: &str, level: &str, member: &Member) -> Self {
        self.slice_at(dimension, level, member, member)
    }

    /// Already encoded range, for open bounds
    pub fn range(mut self, dimension: &str, range: Range) -> Self {
        let result = self.cuboid.dimension_index(dimension);
        if let Some(index) = self.record(result) {
            self.ranges[index] = Some(range);
        }
        self
    }

    pub fn group_by(mut self, dimensions: &[&str]) -> Self {
        self.group_by = dimensions.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn operation(mut self, operation: SliceOperation) -> Self {
        self.operation = operation;
        self
    }

    pub fn measure(mut self, name: impl Into<String>) -> Self {
        self.measures.push(name.into());
        self
    }

    pub fn build(self) -> CubeResult<ScanSpec> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let group_by: Vec<&str> = self.group_by.iter().map(String::as_str).collect();
        let group_key_len = self.cuboid.group_key_len(&group_by)?;

        let ranges = self
            .ranges
            .into_iter()
            .zip(self.cuboid.dimensions())
            .map(|(range, dim)| match range {
                Some(range) => range,
                None if dim.hierarchy().is_some() => Range::singleton(vec![0; dim.key_len()]),
                None => Range::full(dim.key_len()),
            })
            .collect();

        let spec = ScanSpec::new(
            self.cuboid.name(),
            ranges,
            group_key_len,
            self.operation,
            self.measures,
        );
        spec.validate(self.cuboid)?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CodeDimension, DateDimension};
    use std::sync::Arc;

    fn cuboid() -> Cuboid {
        Cuboid::new(
            "sales",
            vec![
                Arc::new(CodeDimension::new("region", 2)),
                Arc::new(DateDimension::new("day")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_bounds_and_stop_successor() {
        let cuboid = cuboid();
        let jan = Member::date(2024, 1, 1).unwrap();
        let spec = ScanSpecBuilder::new(&cuboid)
            .member("region", &Member::text("US"))
            .member_at("day", "month", &jan)
            .measure("sales")
            .build()
            .unwrap();

        let month = 202401u32.to_be_bytes();
        let mut expected = b"US".to_vec();
        expected.extend_from_slice(&month);
        expected.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(spec.start_key(), expected);
        assert_eq!(spec.composite_bound(false), expected);

        let mut stop = expected.clone();
        stop[9] = 1;
        assert_eq!(spec.stop_key(), Some(stop));
    }

    #[test]
    fn test_unset_dimensions_get_defaults() {
        let cuboid = cuboid();
        let spec = ScanSpecBuilder::new(&cuboid).measure("sales").build().unwrap();
        assert_eq!(spec.ranges[0], Range::full(2));
        assert_eq!(spec.ranges[1], Range::singleton(vec![0; 8]));
        assert_eq!(spec.group_key_len, 0);
        assert_eq!(spec.operation, SliceOperation::Add);
    }

    #[test]
    fn test_upper_bound_of_all_ones_is_unbounded() {
        let spec = ScanSpec::new(
            "t",
            vec![Range::full(2)],
            0,
            SliceOperation::Add,
            vec!["m".to_string()],
        );
        assert_eq!(spec.stop_key(), None);
    }

    #[test]
    fn test_first_error_is_reported() {
        let cuboid = cuboid();
        let err = ScanSpecBuilder::new(&cuboid)
            .member("weather", &Member::text("rain"))
            .member("region", &Member::text("TOO_LONG"))
            .measure("sales")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("weather"));

        let err = ScanSpecBuilder::new(&cuboid)
            .member("region", &Member::text("TOO_LONG"))
            .measure("sales")
            .build()
            .unwrap_err();
        assert!(matches!(err, CubeError::Encoding(_)));
    }

    #[test]
    fn test_group_by_sets_prefix_length() {
        let cuboid = cuboid();
        let spec = ScanSpecBuilder::new(&cuboid)
            .group_by(&["region"])
            .measure("sales")
            .build()
            .unwrap();
        assert_eq!(spec.group_key_len, 2);

        assert!(ScanSpecBuilder::new(&cuboid)
            .group_by(&["day"])
            .measure("sales")
            .build()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_mismatches() {
        let cuboid = cuboid();
        let mut spec = ScanSpecBuilder::new(&cuboid).measure("sales").build().unwrap();
        spec.group_key_len = 11;
        assert!(matches!(spec.validate(&cuboid), Err(CubeError::MalformedModel(_))));

        spec.group_key_len = 0;
        spec.ranges.pop();
        assert!(spec.validate(&cuboid).is_err());
    }
}
