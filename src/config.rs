use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CubeError, CubeResult};

/// Engine configuration, usually read from a TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// RocksDB data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Rows fetched from the store per scan round trip
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Threads used to open scanners in parallel (0 = rayon default)
    #[serde(default)]
    pub scan_threads: usize,

    /// Fallback tracing filter when RUST_LOG is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_scan_batch_size() -> usize {
    256
}

fn default_log_filter() -> String {
    "solidb_cube=info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            scan_batch_size: default_scan_batch_size(),
            scan_threads: 0,
            log_filter: default_log_filter(),
        }
    }
}

impl EngineConfig {
    /// Configuration rooted at the given data directory, defaults elsewhere
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> CubeResult<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| CubeError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> CubeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CubeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        tracing::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> CubeResult<()> {
        if self.scan_batch_size == 0 {
            return Err(CubeError::Config(
                "scan_batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
