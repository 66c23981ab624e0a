use crate::{Compression, PodFsError, PodFsResult, DEFAULT_IO_TIMEOUT_MS, DEFAULT_MAX_NAME_LENGTH};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;
/// Upper bound for any block size; a block is buffered whole in memory.
pub const MAX_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PodFsConfig {
    /// Block size used when a caller passes 0.
    pub block_size: u64,
    /// Compression used when a caller does not pick one.
    pub compression: Compression,
    /// Worker pool bound; CPU count when unset.
    pub worker_count: Option<usize>,
    pub io_timeout_ms: u64,
    /// Memoize decompressed blocks inside readers.
    pub block_cache: bool,
    pub max_name_length: usize,
}

impl Default for PodFsConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            compression: Compression::None,
            worker_count: None,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            block_cache: false,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
        }
    }
}

impl PodFsConfig {
    /// Load a JSON config file. A missing file yields the defaults.
    pub async fn load(path: &Path) -> PodFsResult<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("config {} not found, use default", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                warn!("read config {} failed! {}", path.display(), e);
                return Err(PodFsError::IoError(format!("read config failed: {}", e)));
            }
        };
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            warn!("parse config {} failed! {}", path.display(), e);
            PodFsError::InvalidParam(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PodFsResult<()> {
        if self.block_size == 0 {
            return Err(PodFsError::InvalidParam("block_size cannot be zero".to_string()));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(PodFsError::InvalidParam(format!(
                "block_size {} exceeds {}",
                self.block_size, MAX_BLOCK_SIZE
            )));
        }
        if self.max_name_length == 0 {
            return Err(PodFsError::InvalidParam(
                "max_name_length cannot be zero".to_string(),
            ));
        }
        if self.worker_count == Some(0) {
            return Err(PodFsError::InvalidParam("worker_count cannot be zero".to_string()));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(num_cpus::get)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}
