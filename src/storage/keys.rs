//! Composite key helpers
//!
//! Cuboid keys are the concatenation of fixed-width, order-preserving
//! dimension keys, so plain byte-lexicographic comparison of two keys is the
//! same as comparing their dimension tuples.

/// Big-endian increment by one unit in the last byte, with carry.
///
/// Returns `false` when the carry runs past the first byte, in which case the
/// buffer has wrapped to all zeros and no greater key of this width exists.
pub fn increment(key: &mut [u8]) -> bool {
    for byte in key.iter_mut().rev() {
        if *byte == 0xFF {
            *byte = 0x00;
        } else {
            *byte += 1;
            return true;
        }
    }
    false
}

/// The exclusive successor of a fixed-width key, `None` when the key is all 0xFF
pub fn successor(key: &[u8]) -> Option<Vec<u8>> {
    let mut next = key.to_vec();
    if increment(&mut next) {
        Some(next)
    } else {
        None
    }
}

/// Recover the stored level of a hierarchical key segment.
///
/// `levels` holds the cumulative sub-key length of every level, level 0
/// ("ALL") first with length 0. The stored level is the deepest level whose
/// own sub-key is not canonically zero.
pub fn level_of(levels: &[usize], segment: &[u8]) -> usize {
    for level in (1..levels.len()).rev() {
        let start = levels[level - 1];
        let end = levels[level].min(segment.len());
        if start < end && segment[start..end].iter().any(|b| *b != 0) {
            return level;
        }
    }
    0
}

/// Placement of one dimension inside a composite key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub offset: usize,
    pub len: usize,
    /// Cumulative sub-key lengths per hierarchy level, empty for flat dimensions
    pub levels: Vec<usize>,
}

impl Segment {
    pub fn is_hierarchical(&self) -> bool {
        !self.levels.is_empty()
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn slice<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        &key[self.offset..self.end()]
    }

    pub fn level_of(&self, segment: &[u8]) -> usize {
        level_of(&self.levels, segment)
    }

    /// Sub-key length of a level; the full width for flat dimensions
    pub fn level_len(&self, level: usize) -> usize {
        self.levels.get(level).copied().unwrap_or(self.len)
    }
}

/// Offset table of a composite key, derived once per cuboid
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyLayout {
    segments: Vec<Segment>,
}

impl KeyLayout {
    /// Build from (key length, cumulative level lengths) per dimension, in key order
    pub fn new<I>(dimensions: I) -> Self
    where
        I: IntoIterator<Item = (usize, Vec<usize>)>,
    {
        let mut offset = 0;
        let segments = dimensions
            .into_iter()
            .map(|(len, levels)| {
                let segment = Segment {
                    offset,
                    len,
                    levels,
                };
                offset += len;
                segment
            })
            .collect();
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn key_len(&self) -> usize {
        self.segments.last().map(Segment::end).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_carries() {
        let mut key = vec![0x00, 0xFF, 0xFF];
        assert!(increment(&mut key));
        assert_eq!(key, vec![0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_increment_overflow_is_terminal() {
        let mut key = vec![0xFF, 0xFF];
        assert!(!increment(&mut key));
        assert_eq!(successor(&[0xFF, 0xFF]), None);
        assert_eq!(successor(&[0x01, 0xFF]), Some(vec![0x02, 0x00]));
    }

    #[test]
    fn test_empty_key_has_no_successor() {
        assert_eq!(successor(&[]), None);
    }

    #[test]
    fn test_level_of_uses_aligned_zero_suffix() {
        // ALL / MONTH(4) / DAY(8)
        let levels = [0, 4, 8];
        assert_eq!(level_of(&levels, &[0; 8]), 0);
        assert_eq!(level_of(&levels, &[0, 3, 0x16, 0x51, 0, 0, 0, 0]), 1);
        assert_eq!(level_of(&levels, &[0, 3, 0x16, 0x51, 0, 0, 0, 5]), 2);
    }

    #[test]
    fn test_layout_offsets() {
        let layout = KeyLayout::new(vec![(2, vec![]), (8, vec![0, 4, 8]), (1, vec![])]);
        assert_eq!(layout.key_len(), 11);
        let offsets: Vec<usize> = layout.segments().iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 2, 10]);
        assert!(layout.segments()[1].is_hierarchical());
        assert_eq!(layout.segments()[1].level_len(1), 4);
        assert_eq!(layout.segments()[0].level_len(3), 2);
    }
}
