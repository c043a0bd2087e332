use crate::aggregate::{Aggregation, SliceOperation};

/// One decoded row, or a group of rows folded together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    /// Leading `group_key_len` bytes of the row key
    pub group: Vec<u8>,
    /// Index-aligned with the scan's measure list
    pub measures: Vec<Aggregation>,
    pub operation: SliceOperation,
    /// Cuboid the row was read from
    pub cuboid: String,
}

impl RawResult {
    pub fn new(measure_count: usize) -> Self {
        Self {
            measures: vec![Aggregation::new(); measure_count],
            ..Self::default()
        }
    }

    /// Clear for reuse, keeping every allocation
    pub fn reset(&mut self, measure_count: usize) {
        self.group.clear();
        self.measures.resize_with(measure_count, Aggregation::new);
        self.measures.iter_mut().for_each(Aggregation::reset);
        self.operation = SliceOperation::Add;
        self.cuboid.clear();
    }

    pub fn set_group(&mut self, key: &[u8]) {
        self.group.clear();
        self.group.extend_from_slice(key);
    }
}
