//! Typed configuration passed into `GridContext::init`. Grounded on the
//! teacher's scattered `DEFAULT_PAGE_SIZE`/`PAGE_SIZE` constants
//! (`btree/page_cache.rs`, `btree/buffer_pool.rs`), consolidated into one
//! struct per spec §6 ("configuration passed in as a typed struct").

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GridError, GridResult};

pub const DEFAULT_PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Root directory; partition files live under
    /// `<work_dir>/<consistent_id>/cache-<name>/`.
    pub work_dir: PathBuf,
    pub consistent_id: String,
    pub page_size: usize,
    pub partition_count: u16,
    pub backup_count: usize,
    pub direct_io: bool,
    /// Required alignment when `direct_io` is set; the filesystem block
    /// size in the common case.
    pub direct_io_block_size: usize,
    pub wal_segment_size: u64,
    pub checkpoint_interval: Duration,
    pub vacuum_worker_count: usize,
    pub tx_default_timeout: Duration,
    pub backoff_coefficient: u32,
    pub backoff_max_per_try: Duration,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./grid-work"),
            consistent_id: "node-0".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            partition_count: 1024,
            backup_count: 1,
            direct_io: false,
            direct_io_block_size: 512,
            wal_segment_size: 64 * 1024 * 1024,
            checkpoint_interval: Duration::from_secs(180),
            vacuum_worker_count: 4,
            tx_default_timeout: Duration::from_secs(5),
            backoff_coefficient: 2,
            backoff_max_per_try: Duration::from_secs(2),
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> GridResult<()> {
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(GridError::Configuration(format!(
                "page size {} must be a non-zero power of two",
                self.page_size
            )));
        }
        if self.direct_io && self.page_size % self.direct_io_block_size != 0 {
            return Err(GridError::Configuration(format!(
                "page size {} is not a multiple of the direct I/O block size {}",
                self.page_size, self.direct_io_block_size
            )));
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(GridError::Configuration("work_dir must be set".into()));
        }
        if self.partition_count == 0 {
            return Err(GridError::Configuration(
                "partition_count must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Directory holding this node's partition and config files.
    pub fn node_dir(&self) -> PathBuf {
        self.work_dir.join(&self.consistent_id)
    }

    pub fn cache_dir(&self, cache_name: &str) -> PathBuf {
        self.node_dir().join(format!("cache-{}", cache_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(GridConfig::default().validate().is_ok());
    }

    #[test]
    fn non_power_of_two_page_size_rejected() {
        let mut cfg = GridConfig::default();
        cfg.page_size = 4097;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn direct_io_requires_aligned_page_size() {
        let mut cfg = GridConfig::default();
        cfg.direct_io = true;
        cfg.page_size = 4096;
        cfg.direct_io_block_size = 4096;
        assert!(cfg.validate().is_ok());
        cfg.page_size = 1024;
        cfg.direct_io_block_size = 4096;
        assert!(cfg.validate().is_err());
    }
}
