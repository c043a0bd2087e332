use std::sync::Arc;

use crate::aggregate::AggregateFunctionRegistry;
use crate::config::EngineConfig;
use crate::error::{CubeError, CubeResult};
use crate::model::Cuboid;
use crate::query::ResultSet;
use crate::scan::ScanSpec;
use crate::storage::{CubeStore, CuboidWriter, Fact};
use crate::stream::OutputIterator;

/// Entry point: the store, the function registry and the scan thread pool
pub struct CubeEngine {
    config: EngineConfig,
    store: CubeStore,
    registry: Arc<AggregateFunctionRegistry>,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for CubeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CubeEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

impl CubeEngine {
    pub fn open(config: EngineConfig) -> CubeResult<Self> {
        config.validate()?;
        let store = CubeStore::open(&config.data_dir)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.scan_threads)
            .thread_name(|i| format!("cube-scan-{}", i))
            .build()
            .map_err(|e| CubeError::Config(format!("Failed to build scan pool: {}", e)))?;
        tracing::info!(
            "Cube engine ready: {} scan thread(s), batch size {}",
            pool.current_num_threads(),
            config.scan_batch_size
        );
        Ok(Self {
            config,
            store,
            registry: Arc::new(AggregateFunctionRegistry::with_defaults()),
            pool,
        })
    }

    /// Replace the default function registry
    pub fn with_registry(mut self, registry: AggregateFunctionRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &CubeStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<AggregateFunctionRegistry> {
        &self.registry
    }

    pub fn register_cuboid(&self, cuboid: Cuboid) -> CubeResult<Arc<Cuboid>> {
        self.store.register_cuboid(cuboid)
    }

    pub fn cuboid(&self, name: &str) -> CubeResult<Arc<Cuboid>> {
        self.store.cuboid(name)
    }

    pub fn writer(&self, cuboid: &str) -> CubeResult<CuboidWriter> {
        Ok(CuboidWriter::new(
            self.store.clone(),
            self.store.cuboid(cuboid)?,
            self.registry.clone(),
        ))
    }

    /// Write every fact through one writer and close it
    pub fn load<I>(&self, cuboid: &str, facts: I) -> CubeResult<()>
    where
        I: IntoIterator<Item = Fact>,
    {
        let mut writer = self.writer(cuboid)?;
        for fact in facts {
            writer.write(fact)?;
        }
        writer.close()
    }

    /// Run the scans, folding every registered function
    pub fn query(&self, specs: &[ScanSpec]) -> CubeResult<ResultSet> {
        ResultSet::open(
            &self.store,
            self.registry.clone(),
            &self.pool,
            specs,
            None,
            self.config.scan_batch_size,
        )
    }

    /// Run the scans, folding only the named functions and their dependencies.
    /// Needed for COMPLEMENT scans when non-invertible functions are registered.
    pub fn query_functions(&self, specs: &[ScanSpec], functions: &[&str]) -> CubeResult<ResultSet> {
        let functions: Vec<String> = functions.iter().map(|f| f.to_string()).collect();
        ResultSet::open(
            &self.store,
            self.registry.clone(),
            &self.pool,
            specs,
            Some(&functions),
            self.config.scan_batch_size,
        )
    }
}
