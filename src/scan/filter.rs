//! Composite-key range filter
//!
//! The filter runs next to the store iterator and decides, row by row,
//! whether a key is inside the multi-dimensional slice. When a row is outside
//! it computes the smallest key that could possibly match (the seek hint) so
//! the store can jump over the excluded keys instead of reading them.
//!
//! Dimensions are evaluated left to right. For dimension `i`:
//!
//! 1. slice below its range: hint is the row prefix before `i`, then the
//!    lower bounds of `i` and everything after it.
//! 2. slice above its range: hint is the row prefix before `i` incremented
//!    by one, then lower bounds from `i` on. No prefix, or a carry out of the
//!    prefix, means no key can match any more.
//! 3. hierarchical slice stored at a finer level than requested: hint is the
//!    row through the requested level incremented by one, zero filled to the
//!    end of the dimension, then lower bounds after `i`. A coarser level is a
//!    plain skip.
//!
//! Hierarchical slices and bounds are compared over the sub-key of the
//! requested level, which is the finer of the two bound levels.

use std::cmp::Ordering;
use std::io::{Cursor, Read, Write};

use serde::Serialize;

use super::range::Range;
use crate::error::{CubeError, CubeResult};
use crate::storage::keys::{self, KeyLayout, Segment};
use crate::storage::varint::{read_len, read_svarint, read_vec, write_svarint, write_uvarint};

const WIRE_VERSION: u8 = 1;
const FLAG_LEFT_OPEN: u8 = 0x01;
const FLAG_RIGHT_OPEN: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Include,
    Skip,
    /// Reposition the scan at [`CompositeKeyRangeFilter::next_hint`]
    SeekToHint,
}

/// Per-filter diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub rows: u64,
    pub included: u64,
    pub skipped: u64,
    pub seeks: u64,
    /// Rows included because a computed hint would not have moved the scan forward
    pub forced: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DimensionFilter {
    segment: Segment,
    range: Range,
    /// Requested hierarchy level, `None` for flat dimensions
    level: Option<usize>,
    /// Compared prefix of the slice and bounds
    unit: usize,
}

impl DimensionFilter {
    fn new(segment: Segment, range: Range, level: Option<usize>) -> CubeResult<Self> {
        if range.key_len() != segment.len {
            return Err(CubeError::malformed(format!(
                "Range is {} bytes wide, dimension key is {}",
                range.key_len(),
                segment.len
            )));
        }
        let unit = match level {
            Some(level) if level >= segment.levels.len() => {
                return Err(CubeError::Codec(format!(
                    "Requested level {} of a {}-level dimension",
                    level,
                    segment.levels.len()
                )))
            }
            Some(level) => segment.level_len(level),
            None => segment.len,
        };
        Ok(Self {
            segment,
            range,
            level,
            unit,
        })
    }

    fn left(&self) -> &[u8] {
        &self.range.left()[..self.unit]
    }

    fn right(&self) -> &[u8] {
        &self.range.right()[..self.unit]
    }

    /// Smallest matching slice of this dimension, `None` when the range is empty
    fn lower_bound(&self) -> Option<Vec<u8>> {
        let mut bound = vec![0u8; self.segment.len];
        bound[..self.unit].copy_from_slice(self.left());
        if self.range.is_left_open() && (self.unit == 0 || !keys::increment(&mut bound[..self.unit])) {
            return None;
        }
        let upper = self.right();
        let empty = match bound[..self.unit].cmp(upper) {
            Ordering::Greater => true,
            Ordering::Equal => self.range.is_right_open(),
            Ordering::Less => false,
        };
        if empty {
            None
        } else {
            Some(bound)
        }
    }
}

enum Outcome {
    Include,
    Skip,
    Seek,
    Exhausted,
}

/// Row-level range filter over composite keys
#[derive(Debug, Clone)]
pub struct CompositeKeyRangeFilter {
    dimensions: Vec<DimensionFilter>,
    key_len: usize,
    /// Concatenated lower bounds of every dimension
    lower: Vec<u8>,
    hint: Vec<u8>,
    /// Last emitted hint that the scan has not reached yet
    pending: Option<Vec<u8>>,
    last: FilterDecision,
    exhausted: bool,
    stats: FilterStats,
}

impl CompositeKeyRangeFilter {
    /// Build a filter for one range per dimension of the layout.
    ///
    /// The requested level of a hierarchical dimension is the finer of the
    /// levels its two bounds are encoded at.
    pub fn new(layout: &KeyLayout, ranges: &[Range]) -> CubeResult<Self> {
        if ranges.len() != layout.len() {
            return Err(CubeError::malformed(format!(
                "{} ranges for a {}-dimension key",
                ranges.len(),
                layout.len()
            )));
        }
        let dimensions = layout
            .segments()
            .iter()
            .zip(ranges)
            .map(|(segment, range)| {
                let level = segment.is_hierarchical().then(|| {
                    let left = segment.level_of(range.left());
                    let right = segment.level_of(range.right());
                    left.max(right)
                });
                DimensionFilter::new(segment.clone(), range.clone(), level)
            })
            .collect::<CubeResult<Vec<_>>>()?;
        Ok(Self::from_dimensions(dimensions))
    }

    fn from_dimensions(dimensions: Vec<DimensionFilter>) -> Self {
        let key_len = dimensions.last().map(|d| d.segment.end()).unwrap_or(0);
        let mut lower = Vec::with_capacity(key_len);
        let mut empty = false;
        for dim in &dimensions {
            match dim.lower_bound() {
                Some(bound) => lower.extend_from_slice(&bound),
                None => {
                    empty = true;
                    lower.extend(std::iter::repeat(0u8).take(dim.segment.len));
                }
            }
        }
        if empty {
            tracing::debug!("Range filter selects nothing, every row will be skipped");
        }
        Self {
            dimensions,
            key_len,
            lower,
            hint: Vec::with_capacity(key_len),
            pending: None,
            last: FilterDecision::Skip,
            exhausted: empty,
            stats: FilterStats::default(),
        }
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Smallest key the filter can include
    pub fn lower_bound(&self) -> &[u8] {
        &self.lower
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    /// Decide one row. After `SeekToHint` the caller repositions at [`next_hint`](Self::next_hint).
    pub fn filter_row_key(&mut self, row: &[u8]) -> FilterDecision {
        self.stats.rows += 1;
        let decision = self.decide(row);
        match decision {
            FilterDecision::Include => self.stats.included += 1,
            FilterDecision::Skip => self.stats.skipped += 1,
            FilterDecision::SeekToHint => self.stats.seeks += 1,
        }
        self.last = decision;
        decision
    }

    fn decide(&mut self, row: &[u8]) -> FilterDecision {
        if self.exhausted {
            return FilterDecision::Skip;
        }
        if row.len() != self.key_len {
            tracing::warn!(
                "Skipping {}-byte key in a {}-byte keyspace",
                row.len(),
                self.key_len
            );
            return FilterDecision::Skip;
        }
        if let Some(pending) = &self.pending {
            if row < pending.as_slice() {
                return FilterDecision::Skip;
            }
            self.pending = None;
        }

        match self.evaluate(row) {
            Outcome::Include => FilterDecision::Include,
            Outcome::Skip => FilterDecision::Skip,
            Outcome::Exhausted => {
                self.exhausted = true;
                FilterDecision::Skip
            }
            Outcome::Seek if self.hint.as_slice() <= row => {
                self.stats.forced += 1;
                tracing::warn!(
                    "Seek hint {} does not pass row {}, including it",
                    hex::encode(&self.hint),
                    hex::encode(row)
                );
                FilterDecision::Include
            }
            Outcome::Seek => {
                tracing::trace!("Seek from {} to {}", hex::encode(row), hex::encode(&self.hint));
                self.pending = Some(self.hint.clone());
                FilterDecision::SeekToHint
            }
        }
    }

    fn evaluate(&mut self, row: &[u8]) -> Outcome {
        let Self {
            dimensions,
            lower,
            hint,
            ..
        } = self;

        for dim in dimensions.iter() {
            let segment = &dim.segment;
            let slice = &row[segment.offset..segment.offset + dim.unit];

            let below = match slice.cmp(dim.left()) {
                Ordering::Less => true,
                Ordering::Equal => dim.range.is_left_open(),
                Ordering::Greater => false,
            };
            if below {
                hint.clear();
                hint.extend_from_slice(&row[..segment.offset]);
                hint.extend_from_slice(&lower[segment.offset..]);
                return Outcome::Seek;
            }

            let above = match slice.cmp(dim.right()) {
                Ordering::Greater => true,
                Ordering::Equal => dim.range.is_right_open(),
                Ordering::Less => false,
            };
            if above {
                return next_prefix(hint, row, segment.offset, segment.offset, lower);
            }

            if let Some(requested) = dim.level {
                let stored = segment.level_of(segment.slice(row));
                match stored.cmp(&requested) {
                    Ordering::Greater => {
                        return next_prefix(
                            hint,
                            row,
                            segment.offset + dim.unit,
                            segment.end(),
                            lower,
                        )
                    }
                    Ordering::Less => return Outcome::Skip,
                    Ordering::Equal => {}
                }
            }
        }
        Outcome::Include
    }

    /// Hint computed by the last `SeekToHint` decision
    pub fn next_hint(&self) -> &[u8] {
        &self.hint
    }

    /// Include iff the row key of the current row was included
    pub fn filter_cell(&self) -> FilterDecision {
        if self.last == FilterDecision::Include {
            FilterDecision::Include
        } else {
            FilterDecision::Skip
        }
    }

    /// No later key can match; the scan may stop
    pub fn filter_all_remaining(&self) -> bool {
        self.exhausted
    }

    /// Forget per-scan state, keeping the ranges
    pub fn reset(&mut self) {
        self.pending = None;
        self.last = FilterDecision::Skip;
        self.stats = FilterStats::default();
        self.exhausted = self
            .dimensions
            .iter()
            .any(|d| d.lower_bound().is_none());
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> CubeResult<()> {
        w.write_all(&[WIRE_VERSION])?;
        write_uvarint(w, self.dimensions.len() as u64)?;
        for dim in &self.dimensions {
            write_uvarint(w, dim.segment.len as u64)?;
            write_uvarint(w, dim.segment.levels.len() as u64)?;
            for len in &dim.segment.levels {
                write_uvarint(w, *len as u64)?;
            }
            write_svarint(w, dim.level.map(|l| l as i64).unwrap_or(-1))?;
            let mut flags = 0u8;
            if dim.range.is_left_open() {
                flags |= FLAG_LEFT_OPEN;
            }
            if dim.range.is_right_open() {
                flags |= FLAG_RIGHT_OPEN;
            }
            w.write_all(&[flags])?;
            w.write_all(dim.range.left())?;
            w.write_all(dim.range.right())?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> CubeResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> CubeResult<Self> {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)?;
        if byte[0] != WIRE_VERSION {
            return Err(CubeError::Codec(format!(
                "Unsupported filter version {}",
                byte[0]
            )));
        }

        let count = read_len(r)?;
        let mut dimensions = Vec::with_capacity(count.min(64));
        let mut offset = 0;
        for _ in 0..count {
            let len = read_len(r)?;
            let level_count = read_len(r)?;
            let mut levels = Vec::with_capacity(level_count.min(64));
            for _ in 0..level_count {
                let level_len = read_len(r)?;
                if level_len > len {
                    return Err(CubeError::Codec(format!(
                        "Level length {} exceeds key length {}",
                        level_len, len
                    )));
                }
                levels.push(level_len);
            }
            let level = match read_svarint(r)? {
                -1 => None,
                l if l >= 0 && !levels.is_empty() => Some(l as usize),
                l => {
                    return Err(CubeError::Codec(format!(
                        "Invalid requested level {}",
                        l
                    )))
                }
            };
            r.read_exact(&mut byte)?;
            let flags = byte[0];
            let left = read_vec(r, len)?;
            let right = read_vec(r, len)?;

            let range = Range::new(
                left,
                right,
                flags & FLAG_LEFT_OPEN != 0,
                flags & FLAG_RIGHT_OPEN != 0,
            )?;
            let segment = Segment {
                offset,
                len,
                levels,
            };
            offset += len;
            dimensions.push(DimensionFilter::new(segment, range, level)?);
        }
        Ok(Self::from_dimensions(dimensions))
    }

    /// Decode a complete serialized filter
    pub fn from_bytes(bytes: &[u8]) -> CubeResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let filter = Self::read_from(&mut cursor)?;
        if cursor.position() as usize != bytes.len() {
            return Err(CubeError::Codec("Trailing bytes after filter".to_string()));
        }
        Ok(filter)
    }
}

/// `row[..cut]` plus one, zero filled up to `fill_end`, then the lower bounds
fn next_prefix(hint: &mut Vec<u8>, row: &[u8], cut: usize, fill_end: usize, lower: &[u8]) -> Outcome {
    if cut == 0 {
        return Outcome::Exhausted;
    }
    hint.clear();
    hint.extend_from_slice(&row[..cut]);
    if !keys::increment(hint) {
        return Outcome::Exhausted;
    }
    hint.resize(fill_end, 0);
    hint.extend_from_slice(&lower[fill_end..]);
    Outcome::Seek
}
