use std::collections::BTreeMap;
use std::sync::Arc;

use super::row::{decode_row, encode_row};
use super::store::CubeStore;
use crate::aggregate::{AggregateFunctionRegistry, Aggregation, SliceOperation};
use crate::error::{CubeError, CubeResult};
use crate::model::{Cuboid, Member};
use crate::stream::OutputIterator;

/// One raw observation: a finest-level member per dimension and measure values
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub members: Vec<Member>,
    pub measures: Vec<(String, f64)>,
}

impl Fact {
    pub fn new(members: Vec<Member>) -> Self {
        Self {
            members,
            measures: Vec::new(),
        }
    }

    pub fn measure(mut self, name: impl Into<String>, value: f64) -> Self {
        self.measures.push((name.into(), value));
        self
    }
}

/// Loads facts into a cuboid.
///
/// Every fact is rolled up to each combination of hierarchy levels, so a
/// day-level fact also lands in its month and ALL buckets. Rows are buffered
/// and merged with what is already stored when the writer is closed.
pub struct CuboidWriter {
    store: CubeStore,
    cuboid: Arc<Cuboid>,
    registry: Arc<AggregateFunctionRegistry>,
    rows: BTreeMap<Vec<u8>, BTreeMap<String, Aggregation>>,
    /// Level choices per dimension, `None` for flat dimensions
    level_choices: Vec<Vec<Option<usize>>>,
    facts: usize,
    closed: bool,
}

impl CuboidWriter {
    pub fn new(store: CubeStore, cuboid: Arc<Cuboid>, registry: Arc<AggregateFunctionRegistry>) -> Self {
        let level_choices = cuboid
            .dimensions()
            .iter()
            .map(|d| match d.hierarchy() {
                Some(h) => (0..h.depth()).map(Some).collect(),
                None => vec![None],
            })
            .collect();
        Self {
            store,
            cuboid,
            registry,
            rows: BTreeMap::new(),
            level_choices,
            facts: 0,
            closed: false,
        }
    }

    /// Distinct row keys buffered so far
    pub fn pending_rows(&self) -> usize {
        self.rows.len()
    }

    /// Every key the fact contributes to, one per level combination
    fn rollup_keys(&self, members: &[Member]) -> CubeResult<Vec<Vec<u8>>> {
        let mut combos: Vec<Vec<Option<usize>>> = vec![Vec::new()];
        for choices in &self.level_choices {
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    choices.iter().map(move |level| {
                        let mut combo = prefix.clone();
                        combo.push(*level);
                        combo
                    })
                })
                .collect();
        }

        combos
            .into_iter()
            .map(|levels| {
                let members: Vec<(Member, Option<usize>)> =
                    members.iter().cloned().zip(levels).collect();
                self.cuboid.encode_key(&members)
            })
            .collect()
    }
}

impl OutputIterator for CuboidWriter {
    type Item = Fact;

    fn write(&mut self, fact: Fact) -> CubeResult<()> {
        if self.closed {
            return Err(CubeError::protocol("write() after close()"));
        }
        for key in self.rollup_keys(&fact.members)? {
            let columns = self.rows.entry(key).or_default();
            for (measure, value) in &fact.measures {
                let aggregation = columns.entry(measure.clone()).or_default();
                self.registry.apply_all(aggregation, *value)?;
            }
        }
        self.facts += 1;
        Ok(())
    }

    /// Merge buffered rows into the stored ones and write them in one batch
    fn close(&mut self) -> CubeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let table = self.cuboid.name();
        let mut batch = Vec::with_capacity(self.rows.len());
        for (key, mut columns) in std::mem::take(&mut self.rows) {
            if let Some(stored) = self.store.get_row(table, &key)? {
                for (measure, state) in decode_row(&stored)? {
                    let aggregation = columns.entry(measure).or_default();
                    self.registry
                        .merge_all(aggregation, &state, SliceOperation::Add)?;
                }
            }
            let value = encode_row(columns.iter().map(|(name, agg)| (name.as_str(), agg)))?;
            batch.push((key, value));
        }
        self.store.write_rows(table, &batch)?;
        tracing::info!(
            "Loaded {} fact(s) into {} as {} row(s)",
            self.facts,
            table,
            batch.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::functions::{COUNT, SUM};
    use crate::model::{CodeDimension, DateDimension, LEVEL_MONTH};
    use tempfile::TempDir;

    fn setup() -> (CubeStore, Arc<Cuboid>, Arc<AggregateFunctionRegistry>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = CubeStore::open(temp_dir.path()).unwrap();
        let cuboid = Cuboid::new(
            "sales",
            vec![
                Arc::new(CodeDimension::new("region", 2)),
                Arc::new(DateDimension::new("day")),
            ],
        )
        .unwrap();
        let cuboid = store.register_cuboid(cuboid).unwrap();
        let registry = Arc::new(AggregateFunctionRegistry::with_defaults());
        (store, cuboid, registry, temp_dir)
    }

    fn fact(region: &str, day: u32, value: f64) -> Fact {
        let date = Member::date(2024, 1, day).unwrap();
        Fact::new(vec![Member::text(region), date]).measure("sales", value)
    }

    fn stored(store: &CubeStore, cuboid: &Cuboid, key: &[(Member, Option<usize>)]) -> Aggregation {
        let key = cuboid.encode_key(key).unwrap();
        let row = store.get_row("sales", &key).unwrap().unwrap();
        decode_row(&row).unwrap().remove(0).1
    }

    #[test]
    fn test_facts_roll_up_to_every_level() {
        let (store, cuboid, registry, _tmp) = setup();
        let mut writer = CuboidWriter::new(store.clone(), cuboid.clone(), registry.clone());
        writer.write(fact("US", 5, 10.0)).unwrap();
        writer.write(fact("US", 6, 5.0)).unwrap();
        // ALL + MONTH + two days
        assert_eq!(writer.pending_rows(), 4);
        writer.close().unwrap();

        let jan = Member::date(2024, 1, 1).unwrap();
        let month = stored(&store, &cuboid, &[(Member::text("US"), None), (jan, Some(LEVEL_MONTH))]);
        assert_eq!(registry.value(SUM, &month).unwrap(), Some(15.0));
        assert_eq!(registry.value(COUNT, &month).unwrap(), Some(2.0));

        let all = stored(&store, &cuboid, &[(Member::text("US"), None), (Member::All, Some(0))]);
        assert_eq!(registry.value(SUM, &all).unwrap(), Some(15.0));
    }

    #[test]
    fn test_second_load_merges_with_stored_rows() {
        let (store, cuboid, registry, _tmp) = setup();
        for value in [10.0, 2.0] {
            let mut writer = CuboidWriter::new(store.clone(), cuboid.clone(), registry.clone());
            writer.write(fact("EU", 5, value)).unwrap();
            writer.close().unwrap();
        }
        let day = stored(
            &store,
            &cuboid,
            &[(Member::text("EU"), None), (Member::date(2024, 1, 5).unwrap(), None)],
        );
        assert_eq!(registry.value(SUM, &day).unwrap(), Some(12.0));
        assert_eq!(registry.value("MIN", &day).unwrap(), Some(2.0));
    }

    #[test]
    fn test_write_after_close_is_rejected() {
        let (store, cuboid, registry, _tmp) = setup();
        let mut writer = CuboidWriter::new(store, cuboid, registry);
        writer.close().unwrap();
        assert!(writer.write(fact("US", 1, 1.0)).is_err());
    }

    #[test]
    fn test_wrong_member_count_is_malformed() {
        let (store, cuboid, registry, _tmp) = setup();
        let mut writer = CuboidWriter::new(store, cuboid, registry);
        let err = writer
            .write(Fact::new(vec![Member::text("US")]).measure("sales", 1.0))
            .unwrap_err();
        assert!(matches!(err, CubeError::MalformedModel(_)));
    }
}
