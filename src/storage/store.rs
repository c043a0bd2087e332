use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{CubeError, CubeResult};
use crate::model::Cuboid;
use crate::scan::filter::{CompositeKeyRangeFilter, FilterDecision, FilterStats};

/// Column family prefix of cuboid tables
pub const CUBOID_CF_PREFIX: &str = "cuboid_";

pub fn column_family(table: &str) -> String {
    format!("{}{}", CUBOID_CF_PREFIX, table)
}

fn poisoned() -> CubeError {
    CubeError::StoreIo("store lock poisoned".to_string())
}

fn missing_table(table: &str) -> CubeError {
    CubeError::malformed(format!("Unknown cuboid table '{}'", table))
}

/// Cuboid tables backed by RocksDB, one column family per cuboid
#[derive(Clone)]
pub struct CubeStore {
    db: Arc<RwLock<DB>>,
    path: PathBuf,
    /// Cuboid models registered in this process
    cuboids: Arc<RwLock<HashMap<String, Arc<Cuboid>>>>,
    /// Every cuboid column family present in the database
    tables: Arc<RwLock<BTreeSet<String>>>,
}

impl std::fmt::Debug for CubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CubeStore").field("path", &self.path).finish()
    }
}

impl CubeStore {
    /// Open or create the database, discovering existing column families
    pub fn open<P: AsRef<Path>>(data_dir: P) -> CubeResult<Self> {
        let path = data_dir.as_ref().to_path_buf();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_keep_log_file_num(5);

        let cf_names = match DB::list_cf(&opts, &path) {
            Ok(cfs) => cfs,
            Err(_) => vec!["default".to_string()],
        };

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)
            .map_err(|e| CubeError::StoreIo(format!("Failed to open RocksDB: {}", e)))?;

        let tables: BTreeSet<String> = cf_names
            .iter()
            .filter_map(|name| name.strip_prefix(CUBOID_CF_PREFIX))
            .map(str::to_string)
            .collect();
        tracing::info!(
            "Opened cube store at {} with {} cuboid table(s)",
            path.display(),
            tables.len()
        );

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            path,
            cuboids: Arc::new(RwLock::new(HashMap::new())),
            tables: Arc::new(RwLock::new(tables)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Catalogue a cuboid, creating its column family if needed
    pub fn register_cuboid(&self, cuboid: Cuboid) -> CubeResult<Arc<Cuboid>> {
        let name = cuboid.name().to_string();
        {
            let cuboids = self.cuboids.read().map_err(|_| poisoned())?;
            if cuboids.contains_key(&name) {
                return Err(CubeError::malformed(format!(
                    "Cuboid '{}' is already registered",
                    name
                )));
            }
        }

        let cf_name = column_family(&name);
        {
            let mut db = self.db.write().map_err(|_| poisoned())?;
            if db.cf_handle(&cf_name).is_none() {
                db.create_cf(&cf_name, &Options::default())?;
                tracing::info!("Created column family {}", cf_name);
            }
        }
        self.tables
            .write()
            .map_err(|_| poisoned())?
            .insert(name.clone());

        let cuboid = Arc::new(cuboid);
        self.cuboids
            .write()
            .map_err(|_| poisoned())?
            .insert(name.clone(), cuboid.clone());
        tracing::info!(
            "Registered cuboid {} ({} dimensions, {}-byte key)",
            name,
            cuboid.dimensions().len(),
            cuboid.key_len()
        );
        Ok(cuboid)
    }

    pub fn cuboid(&self, name: &str) -> CubeResult<Arc<Cuboid>> {
        self.cuboids
            .read()
            .map_err(|_| poisoned())?
            .get(name)
            .cloned()
            .ok_or_else(|| CubeError::malformed(format!("Unknown cuboid '{}'", name)))
    }

    /// Names of every cuboid table in the database, registered or not
    pub fn list_tables(&self) -> CubeResult<Vec<String>> {
        Ok(self
            .tables
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .cloned()
            .collect())
    }

    pub fn get_row(&self, table: &str, key: &[u8]) -> CubeResult<Option<Vec<u8>>> {
        let db = self.db.read().map_err(|_| poisoned())?;
        let cf = db
            .cf_handle(&column_family(table))
            .ok_or_else(|| missing_table(table))?;
        Ok(db.get_cf(cf, key)?)
    }

    /// Write rows in one atomic batch
    pub fn write_rows(&self, table: &str, rows: &[(Vec<u8>, Vec<u8>)]) -> CubeResult<()> {
        let db = self.db.read().map_err(|_| poisoned())?;
        let cf = db
            .cf_handle(&column_family(table))
            .ok_or_else(|| missing_table(table))?;
        let mut batch = WriteBatch::default();
        for (key, value) in rows {
            batch.put_cf(cf, key, value);
        }
        db.write(batch)?;
        tracing::debug!("Wrote {} row(s) to {}", rows.len(), table);
        Ok(())
    }

    /// Unfiltered range read, used for inspection
    pub fn scan_raw(
        &self,
        table: &str,
        start: &[u8],
        stop: Option<&[u8]>,
        limit: usize,
    ) -> CubeResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let db = self.db.read().map_err(|_| poisoned())?;
        let cf = db
            .cf_handle(&column_family(table))
            .ok_or_else(|| missing_table(table))?;
        let mut iter = db.raw_iterator_cf(cf);
        iter.seek(start);

        let mut rows = Vec::new();
        while rows.len() < limit {
            let (Some(key), Some(value)) = (iter.key(), iter.value()) else {
                break;
            };
            if stop.is_some_and(|stop| key >= stop) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
            iter.next();
        }
        iter.status()?;
        Ok(rows)
    }

    /// Open a filtered scan over `[start, stop)`.
    ///
    /// The filter arrives serialized, as it would at a remote storage node,
    /// and the first batch is fetched before returning.
    pub fn open_scan(
        &self,
        table: &str,
        start: Vec<u8>,
        stop: Option<Vec<u8>>,
        filter: &[u8],
        batch_size: usize,
    ) -> CubeResult<StoreScan> {
        if batch_size == 0 {
            return Err(CubeError::Config(
                "scan batch size must be greater than 0".to_string(),
            ));
        }
        let filter = CompositeKeyRangeFilter::from_bytes(filter)?;
        {
            let db = self.db.read().map_err(|_| poisoned())?;
            if db.cf_handle(&column_family(table)).is_none() {
                return Err(missing_table(table));
            }
        }
        tracing::debug!(
            "Opening scan on {} from {} to {}",
            table,
            hex::encode(&start),
            stop.as_deref().map(hex::encode).unwrap_or_else(|| "end".to_string())
        );

        let mut scan = StoreScan {
            db: self.db.clone(),
            table: table.to_string(),
            filter,
            stop,
            resume: Some(start),
            batch: VecDeque::with_capacity(batch_size),
            batch_size,
            batches: 0,
            done: false,
            closed: false,
        };
        scan.fetch()?;
        Ok(scan)
    }
}

/// Batched filtered range scan over one cuboid table
pub struct StoreScan {
    db: Arc<RwLock<DB>>,
    table: String,
    filter: CompositeKeyRangeFilter,
    stop: Option<Vec<u8>>,
    /// Where the next batch starts, `None` once the range is used up
    resume: Option<Vec<u8>>,
    batch: VecDeque<(Vec<u8>, Vec<u8>)>,
    batch_size: usize,
    batches: u64,
    done: bool,
    closed: bool,
}

impl StoreScan {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn stats(&self) -> FilterStats {
        self.filter.stats()
    }

    /// Number of store round trips so far
    pub fn batches(&self) -> u64 {
        self.batches
    }

    fn check_open(&self) -> CubeResult<()> {
        if self.closed {
            return Err(CubeError::protocol("scan used after close()"));
        }
        Ok(())
    }

    /// True when another included row is available
    pub fn has_row(&mut self) -> CubeResult<bool> {
        self.check_open()?;
        while self.batch.is_empty() && !self.done {
            self.fetch()?;
        }
        Ok(!self.batch.is_empty())
    }

    pub fn next_row(&mut self) -> CubeResult<Option<(Vec<u8>, Vec<u8>)>> {
        if !self.has_row()? {
            return Ok(None);
        }
        Ok(self.batch.pop_front())
    }

    fn fetch(&mut self) -> CubeResult<()> {
        let Some(resume) = self.resume.take() else {
            self.done = true;
            return Ok(());
        };

        let db = self.db.read().map_err(|_| poisoned())?;
        let cf = db
            .cf_handle(&column_family(&self.table))
            .ok_or_else(|| missing_table(&self.table))?;
        let mut iter = db.raw_iterator_cf(cf);
        iter.seek(&resume);
        self.batches += 1;

        while let Some(key) = iter.key() {
            if self.stop.as_deref().is_some_and(|stop| key >= stop)
                || self.filter.filter_all_remaining()
            {
                break;
            }
            if self.batch.len() >= self.batch_size {
                self.resume = Some(key.to_vec());
                break;
            }
            match self.filter.filter_row_key(key) {
                FilterDecision::Include => {
                    let key = key.to_vec();
                    if self.filter.filter_cell() == FilterDecision::Include {
                        let value = iter.value().map(<[u8]>::to_vec).unwrap_or_default();
                        self.batch.push_back((key, value));
                    }
                    iter.next();
                }
                FilterDecision::Skip => iter.next(),
                FilterDecision::SeekToHint => iter.seek(self.filter.next_hint()),
            }
        }
        iter.status()?;

        if self.resume.is_none() {
            self.done = true;
        }
        Ok(())
    }

    pub fn close(&mut self) -> CubeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.batch.clear();
        let stats = self.filter.stats();
        tracing::debug!(
            "Closed scan on {}: {} rows seen, {} included, {} skipped, {} seeks, {} forced, {} batch(es)",
            self.table,
            stats.rows,
            stats.included,
            stats.skipped,
            stats.seeks,
            stats.forced,
            self.batches
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CodeDimension;
    use crate::scan::Range;
    use tempfile::TempDir;

    fn store_with_codes() -> (CubeStore, Arc<Cuboid>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = CubeStore::open(temp_dir.path()).unwrap();
        let cuboid = Cuboid::new(
            "codes",
            vec![
                Arc::new(CodeDimension::new("a", 1)),
                Arc::new(CodeDimension::new("b", 1)),
            ],
        )
        .unwrap();
        let cuboid = store.register_cuboid(cuboid).unwrap();
        let mut rows = Vec::new();
        for a in b'a'..=b'e' {
            for b in b'a'..=b'e' {
                rows.push((vec![a, b], vec![a, b]));
            }
        }
        store.write_rows("codes", &rows).unwrap();
        (store, cuboid, temp_dir)
    }

    fn collect(scan: &mut StoreScan) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        while let Some((key, _)) = scan.next_row().unwrap() {
            keys.push(key);
        }
        keys
    }

    #[test]
    fn test_register_creates_table() {
        let (store, _, _tmp) = store_with_codes();
        assert_eq!(store.list_tables().unwrap(), vec!["codes".to_string()]);
        assert_eq!(store.get_row("codes", b"ab").unwrap(), Some(b"ab".to_vec()));
        assert!(matches!(
            store.get_row("missing", b"ab"),
            Err(CubeError::MalformedModel(_))
        ));
        assert!(store.cuboid("missing").is_err());
    }

    #[test]
    fn test_tables_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = CubeStore::open(temp_dir.path()).unwrap();
            let cuboid =
                Cuboid::new("t", vec![Arc::new(CodeDimension::new("a", 1)) as _]).unwrap();
            store.register_cuboid(cuboid).unwrap();
        }
        let store = CubeStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.list_tables().unwrap(), vec!["t".to_string()]);
    }

    #[test]
    fn test_filtered_scan_across_small_batches() {
        let (store, cuboid, _tmp) = store_with_codes();
        let ranges = vec![
            Range::closed(b"b".to_vec(), b"d".to_vec()).unwrap(),
            Range::singleton(b"c".to_vec()),
        ];
        let filter = CompositeKeyRangeFilter::new(cuboid.layout(), &ranges).unwrap();
        let mut scan = store
            .open_scan("codes", b"bc".to_vec(), Some(b"dd".to_vec()), &filter.to_bytes().unwrap(), 1)
            .unwrap();

        assert_eq!(collect(&mut scan), vec![b"bc".to_vec(), b"cc".to_vec(), b"dc".to_vec()]);
        let stats = scan.stats();
        assert_eq!(stats.included, 3);
        assert!(stats.seeks >= 2);
        assert!(scan.batches() >= 3);
        scan.close().unwrap();
        assert!(scan.has_row().is_err());
    }

    #[test]
    fn test_raw_scan_respects_stop_and_limit() {
        let (store, _, _tmp) = store_with_codes();
        let rows = store.scan_raw("codes", b"b", Some(b"c"), 100).unwrap();
        assert_eq!(rows.len(), 5);
        let rows = store.scan_raw("codes", b"", None, 3).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_corrupt_filter_fails_open() {
        let (store, _, _tmp) = store_with_codes();
        let err = store
            .open_scan("codes", vec![], None, &[7, 7], 16)
            .err()
            .unwrap();
        assert!(matches!(err, CubeError::Codec(_)));
    }
}
