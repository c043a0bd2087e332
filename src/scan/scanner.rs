use super::filter::{CompositeKeyRangeFilter, FilterStats};
use super::spec::ScanSpec;
use crate::error::{CubeError, CubeResult};
use crate::model::Cuboid;
use crate::query::RawResult;
use crate::storage::{decode_row_into, CubeStore, StoreScan};
use crate::stream::InputIterator;

/// Range scan of one cuboid with the composite-key filter installed.
///
/// Yields one [`RawResult`] per included row, in key order. The same result
/// buffer is reused for every row.
pub struct FilteringScanner {
    scan: StoreScan,
    measures: Vec<String>,
    group_key_len: usize,
    current: RawResult,
    positioned: bool,
    /// A row failed to read; the scan cannot resume past it
    failed: bool,
    closed: bool,
}

impl FilteringScanner {
    /// Open the store scan for a validated spec; fetches the first batch
    pub fn open(store: &CubeStore, cuboid: &Cuboid, spec: &ScanSpec, batch_size: usize) -> CubeResult<Self> {
        spec.validate(cuboid)?;
        let filter = CompositeKeyRangeFilter::new(cuboid.layout(), &spec.ranges)?;

        // Start no earlier than the first key the filter accepts
        let start = spec.start_key().max(filter.lower_bound().to_vec());
        let scan = store.open_scan(
            cuboid.name(),
            start,
            spec.stop_key(),
            &filter.to_bytes()?,
            batch_size,
        )?;

        let mut current = RawResult::new(spec.measures.len());
        current.operation = spec.operation;
        current.cuboid = cuboid.name().to_string();
        Ok(Self {
            scan,
            measures: spec.measures.clone(),
            group_key_len: spec.group_key_len,
            current,
            positioned: false,
            failed: false,
            closed: false,
        })
    }

    pub fn cuboid(&self) -> &str {
        &self.current.cuboid
    }

    pub fn stats(&self) -> FilterStats {
        self.scan.stats()
    }

    fn check_open(&self) -> CubeResult<()> {
        if self.closed {
            return Err(CubeError::protocol("scanner used after close()"));
        }
        if self.failed {
            return Err(CubeError::protocol("scanner used after a failed read"));
        }
        Ok(())
    }

    fn read_next(&mut self) -> CubeResult<()> {
        let Some((key, value)) = self.scan.next_row()? else {
            return Err(CubeError::protocol("next() past the end of scan"));
        };
        if key.len() < self.group_key_len {
            return Err(CubeError::Codec(format!(
                "{}-byte key is shorter than the {}-byte group key",
                key.len(),
                self.group_key_len
            )));
        }
        self.current.set_group(&key[..self.group_key_len]);
        decode_row_into(&value, &self.measures, &mut self.current.measures)
    }
}

impl InputIterator for FilteringScanner {
    type Item = RawResult;

    fn has_next(&mut self) -> CubeResult<bool> {
        self.check_open()?;
        let result = self.scan.has_row();
        if result.is_err() {
            self.failed = true;
            self.positioned = false;
        }
        result
    }

    /// A row that fails to decode ends the scan
    fn next(&mut self) -> CubeResult<()> {
        self.check_open()?;
        self.positioned = false;
        match self.read_next() {
            Ok(()) => {
                self.positioned = true;
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    fn current(&self) -> CubeResult<&RawResult> {
        self.check_open()?;
        if !self.positioned {
            return Err(CubeError::protocol("current() before next()"));
        }
        Ok(&self.current)
    }

    fn close(&mut self) -> CubeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.positioned = false;
        self.scan.close()
    }
}
