use std::cmp::Ordering;

use crate::error::{CubeError, CubeResult};

/// Bound pair of one dimension, each bound exactly the dimension's key width
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    left: Vec<u8>,
    right: Vec<u8>,
    left_open: bool,
    right_open: bool,
}

impl Range {
    pub fn new(left: Vec<u8>, right: Vec<u8>, left_open: bool, right_open: bool) -> CubeResult<Self> {
        if left.len() != right.len() {
            return Err(CubeError::malformed(format!(
                "Range bounds differ in width ({} vs {})",
                left.len(),
                right.len()
            )));
        }
        Ok(Self {
            left,
            right,
            left_open,
            right_open,
        })
    }

    /// `[left, right]`
    pub fn closed(left: Vec<u8>, right: Vec<u8>) -> CubeResult<Self> {
        Self::new(left, right, false, false)
    }

    /// `[value, value]`
    pub fn singleton(value: Vec<u8>) -> Self {
        Self {
            right: value.clone(),
            left: value,
            left_open: false,
            right_open: false,
        }
    }

    /// Every key of the given width
    pub fn full(key_len: usize) -> Self {
        Self {
            left: vec![0x00; key_len],
            right: vec![0xFF; key_len],
            left_open: false,
            right_open: false,
        }
    }

    pub fn left(&self) -> &[u8] {
        &self.left
    }

    pub fn right(&self) -> &[u8] {
        &self.right
    }

    pub fn is_left_open(&self) -> bool {
        self.left_open
    }

    pub fn is_right_open(&self) -> bool {
        self.right_open
    }

    pub fn key_len(&self) -> usize {
        self.left.len()
    }

    pub fn is_singleton(&self) -> bool {
        self.left == self.right && !self.left_open && !self.right_open
    }

    /// Interval membership of a full-width slice
    pub fn contains(&self, slice: &[u8]) -> bool {
        let above_left = match slice.cmp(&self.left[..]) {
            Ordering::Less => false,
            Ordering::Equal => !self.left_open,
            Ordering::Greater => true,
        };
        let below_right = match slice.cmp(&self.right[..]) {
            Ordering::Greater => false,
            Ordering::Equal => !self.right_open,
            Ordering::Less => true,
        };
        above_left && below_right
    }
}
