use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CubeError, CubeResult};
use crate::storage::keys;

/// A domain value of one dimension
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Member {
    /// The "ALL" member of a hierarchy (level 0)
    All,
    Text(String),
    Int(i64),
    Date(NaiveDate),
}

impl Member {
    pub fn text(value: impl Into<String>) -> Self {
        Member::Text(value.into())
    }

    /// Calendar date member, `None` for an invalid date
    pub fn date(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Member::Date)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::All => write!(f, "ALL"),
            Member::Text(s) => write!(f, "{}", s),
            Member::Int(i) => write!(f, "{}", i),
            Member::Date(d) => write!(f, "{}", d),
        }
    }
}

/// One level of a dimension hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyLevel {
    pub name: String,
    /// Cumulative sub-key length, from the start of the dimension key
    pub key_len: usize,
}

/// Level metadata of a hierarchical dimension.
///
/// Level 0 is always "ALL" with an empty sub-key; each deeper level extends
/// the sub-key of the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hierarchy {
    levels: Vec<HierarchyLevel>,
}

impl Hierarchy {
    /// Build from (name, cumulative key length) pairs below "ALL"
    pub fn new(levels: &[(&str, usize)]) -> CubeResult<Self> {
        let mut previous = 0;
        for (name, key_len) in levels {
            if *key_len <= previous {
                return Err(CubeError::malformed(format!(
                    "Hierarchy level '{}' must extend the previous sub-key ({} <= {})",
                    name, key_len, previous
                )));
            }
            previous = *key_len;
        }
        Ok(Self::from_levels(levels))
    }

    /// Known-good level tables; lengths are taken as given
    pub(crate) fn from_levels(levels: &[(&str, usize)]) -> Self {
        let mut all = vec![HierarchyLevel {
            name: "ALL".to_string(),
            key_len: 0,
        }];
        all.extend(levels.iter().map(|(name, key_len)| HierarchyLevel {
            name: name.to_string(),
            key_len: *key_len,
        }));
        Self { levels: all }
    }

    /// Number of levels, including "ALL"
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn deepest(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn levels(&self) -> &[HierarchyLevel] {
        &self.levels
    }

    pub fn level(&self, name: &str) -> CubeResult<usize> {
        self.levels
            .iter()
            .position(|l| l.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| CubeError::malformed(format!("Unknown hierarchy level '{}'", name)))
    }

    pub fn level_len(&self, level: usize) -> usize {
        self.levels.get(level).map(|l| l.key_len).unwrap_or(0)
    }

    pub fn cumulative_lens(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.key_len).collect()
    }

    /// Stored level of an encoded key.
    ///
    /// A member whose finest sub-key is all zeros reads back as the coarser level.
    pub fn level_of(&self, key: &[u8]) -> usize {
        keys::level_of(&self.cumulative_lens(), key)
    }
}

/// Order-preserving fixed-width key codec of one dimension
pub trait Dimension: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Width in bytes of every encoded key
    fn key_len(&self) -> usize;

    /// Write exactly `key_len()` bytes into `buf`.
    ///
    /// `level` only matters for hierarchical dimensions; `None` means the
    /// deepest level. Everything below the requested level is zero-filled.
    fn encode(&self, member: &Member, level: Option<usize>, buf: &mut [u8]) -> CubeResult<()>;

    fn decode(&self, buf: &[u8]) -> CubeResult<Member>;

    fn hierarchy(&self) -> Option<&Hierarchy> {
        None
    }
}

/// Encode into a fresh buffer
pub fn encode_member(
    dimension: &dyn Dimension,
    member: &Member,
    level: Option<usize>,
) -> CubeResult<Vec<u8>> {
    let mut buf = vec![0u8; dimension.key_len()];
    dimension.encode(member, level, &mut buf)?;
    Ok(buf)
}

/// Resolve a level by name for a dimension, rejecting flat dimensions
pub fn level_by_name(dimension: &dyn Dimension, level: &str) -> CubeResult<usize> {
    match dimension.hierarchy() {
        Some(hierarchy) => hierarchy.level(level),
        None => Err(CubeError::malformed(format!(
            "Dimension '{}' has no hierarchy",
            dimension.name()
        ))),
    }
}

pub(crate) fn check_width(dimension: &dyn Dimension, buf: &[u8]) -> CubeResult<()> {
    if buf.len() != dimension.key_len() {
        return Err(CubeError::Encoding(format!(
            "Dimension '{}' expects {} key bytes, got {}",
            dimension.name(),
            dimension.key_len(),
            buf.len()
        )));
    }
    Ok(())
}
