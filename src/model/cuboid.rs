use std::fmt;
use std::sync::Arc;

use super::dimension::{Dimension, Member};
use crate::error::{CubeError, CubeResult};
use crate::storage::keys::KeyLayout;

/// One pre-aggregated table: an ordered list of dimensions whose keys are
/// concatenated into the row key
#[derive(Clone)]
pub struct Cuboid {
    name: String,
    dimensions: Vec<Arc<dyn Dimension>>,
    layout: KeyLayout,
}

impl fmt::Debug for Cuboid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cuboid")
            .field("name", &self.name)
            .field(
                "dimensions",
                &self.dimensions.iter().map(|d| d.name()).collect::<Vec<_>>(),
            )
            .field("key_len", &self.key_len())
            .finish()
    }
}

impl Cuboid {
    pub fn new(name: impl Into<String>, dimensions: Vec<Arc<dyn Dimension>>) -> CubeResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CubeError::malformed("Cuboid name must not be empty"));
        }
        if dimensions.is_empty() {
            return Err(CubeError::malformed(format!(
                "Cuboid '{}' has no dimensions",
                name
            )));
        }
        for (i, dim) in dimensions.iter().enumerate() {
            if dim.key_len() == 0 {
                return Err(CubeError::malformed(format!(
                    "Dimension '{}' has an empty key",
                    dim.name()
                )));
            }
            if dimensions[..i].iter().any(|d| d.name() == dim.name()) {
                return Err(CubeError::malformed(format!(
                    "Dimension '{}' appears twice in cuboid '{}'",
                    dim.name(),
                    name
                )));
            }
        }

        let layout = KeyLayout::new(dimensions.iter().map(|d| {
            let levels = d
                .hierarchy()
                .map(|h| h.cumulative_lens())
                .unwrap_or_default();
            (d.key_len(), levels)
        }));

        Ok(Self {
            name,
            dimensions,
            layout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> &[Arc<dyn Dimension>] {
        &self.dimensions
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    pub fn key_len(&self) -> usize {
        self.layout.key_len()
    }

    pub fn dimension_index(&self, name: &str) -> CubeResult<usize> {
        self.dimensions
            .iter()
            .position(|d| d.name() == name)
            .ok_or_else(|| {
                CubeError::malformed(format!(
                    "Unknown dimension '{}' in cuboid '{}'",
                    name, self.name
                ))
            })
    }

    pub fn offset(&self, index: usize) -> usize {
        self.layout.segment(index).map(|s| s.offset).unwrap_or(0)
    }

    /// Group key length for a GROUP BY over the named dimensions.
    ///
    /// The group key is a key prefix, so the named dimensions must be exactly
    /// the leading dimensions of the cuboid, in any order.
    pub fn group_key_len(&self, group_by: &[&str]) -> CubeResult<usize> {
        let mut indexes = group_by
            .iter()
            .map(|name| self.dimension_index(name))
            .collect::<CubeResult<Vec<_>>>()?;
        indexes.sort_unstable();
        indexes.dedup();
        if indexes.iter().enumerate().any(|(pos, idx)| pos != *idx) {
            return Err(CubeError::malformed(format!(
                "GROUP BY {:?} is not a key prefix of cuboid '{}'",
                group_by, self.name
            )));
        }
        Ok(indexes
            .last()
            .and_then(|last| self.layout.segment(*last))
            .map(|s| s.end())
            .unwrap_or(0))
    }

    /// Encode a full row key from one member (and optional level) per dimension
    pub fn encode_key(&self, members: &[(Member, Option<usize>)]) -> CubeResult<Vec<u8>> {
        if members.len() != self.dimensions.len() {
            return Err(CubeError::malformed(format!(
                "Cuboid '{}' expects {} members, got {}",
                self.name,
                self.dimensions.len(),
                members.len()
            )));
        }
        let mut key = vec![0u8; self.key_len()];
        for ((dim, segment), (member, level)) in self
            .dimensions
            .iter()
            .zip(self.layout.segments())
            .zip(members)
        {
            dim.encode(member, *level, &mut key[segment.offset..segment.end()])?;
        }
        Ok(key)
    }

    /// Decode the member of one dimension from a key or key prefix
    pub fn decode_member(&self, key: &[u8], dimension: &str) -> CubeResult<Member> {
        let index = self.dimension_index(dimension)?;
        let segment = &self.layout.segments()[index];
        if key.len() < segment.end() {
            return Err(CubeError::malformed(format!(
                "Dimension '{}' is not part of the {}-byte key prefix",
                dimension,
                key.len()
            )));
        }
        self.dimensions[index].decode(segment.slice(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::dimensions::{CodeDimension, DateDimension, IntDimension, LEVEL_MONTH};

    fn cuboid() -> Cuboid {
        Cuboid::new(
            "sales_by_region_day",
            vec![
                Arc::new(CodeDimension::new("region", 2)),
                Arc::new(DateDimension::new("day")),
                Arc::new(IntDimension::new("store")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_layout_is_derived_once() {
        let cuboid = cuboid();
        assert_eq!(cuboid.key_len(), 18);
        assert_eq!(cuboid.offset(0), 0);
        assert_eq!(cuboid.offset(1), 2);
        assert_eq!(cuboid.offset(2), 10);
        assert!(cuboid.layout().segments()[1].is_hierarchical());
    }

    #[test]
    fn test_group_key_len_requires_prefix() {
        let cuboid = cuboid();
        assert_eq!(cuboid.group_key_len(&[]).unwrap(), 0);
        assert_eq!(cuboid.group_key_len(&["region"]).unwrap(), 2);
        assert_eq!(cuboid.group_key_len(&["day", "region"]).unwrap(), 10);
        assert!(cuboid.group_key_len(&["day"]).is_err());
        assert!(cuboid.group_key_len(&["weather"]).is_err());
    }

    #[test]
    fn test_encode_and_decode_members() {
        let cuboid = cuboid();
        let jan5 = Member::date(2024, 1, 5).unwrap();
        let key = cuboid
            .encode_key(&[
                (Member::text("US"), None),
                (jan5, Some(LEVEL_MONTH)),
                (Member::Int(7), None),
            ])
            .unwrap();
        assert_eq!(key.len(), 18);
        assert_eq!(cuboid.decode_member(&key, "region").unwrap(), Member::text("US"));
        assert_eq!(
            cuboid.decode_member(&key, "day").unwrap(),
            Member::date(2024, 1, 1).unwrap()
        );
        assert!(cuboid.decode_member(&key[..2], "day").is_err());
    }

    #[test]
    fn test_duplicate_dimension_is_malformed() {
        let err = Cuboid::new(
            "dup",
            vec![
                Arc::new(CodeDimension::new("region", 2)),
                Arc::new(CodeDimension::new("region", 3)),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, CubeError::MalformedModel(_)));
    }
}
