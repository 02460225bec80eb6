//! Configuration for basalt
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a basalt engine instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── MANIFEST         (live segment set + last committed sequence)
    ///     ├── wal/             (one numbered log per memtable generation)
    ///     └── sstables/        (numbered segment files)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of the active memtable before rotation (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Transaction Configuration
    // -------------------------------------------------------------------------
    /// Max bytes a single transaction may buffer before `Capacity` is
    /// returned; callers split oversized batches across transactions
    pub max_write_set_bytes: usize,

    // -------------------------------------------------------------------------
    // Segment / Compaction Configuration
    // -------------------------------------------------------------------------
    /// Target uncompressed size of a segment data block (in bytes)
    pub block_size: usize,

    /// Target size of a single segment file produced by compaction
    pub segment_size_target: u64,

    /// Number of level-0 segments that triggers a compaction into level 1
    pub l0_compaction_trigger: usize,

    /// Byte budget for level 1; level n holds this times
    /// `level_size_multiplier`^(n-1)
    pub level_base_size: u64,

    /// Growth factor between adjacent levels
    pub level_size_multiplier: u64,

    /// Deepest level; tombstones are only dropped when compacting into it
    pub max_levels: usize,

    /// Run flush/compaction on the background worker. Disable for tests
    /// that want deterministic, foreground-only behavior.
    pub background_compaction: bool,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every commit (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced commits (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./basalt_data"),
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            memtable_size_limit: 64 * 1024 * 1024, // 64 MB
            max_write_set_bytes: 16 * 1024 * 1024, // 16 MB
            block_size: 4 * 1024,
            segment_size_target: 8 * 1024 * 1024,
            l0_compaction_trigger: 4,
            level_base_size: 64 * 1024 * 1024,
            level_size_multiplier: 10,
            max_levels: 6,
            background_compaction: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Byte budget for a given level (level 0 is count-triggered, not sized)
    pub fn level_size_limit(&self, level: usize) -> u64 {
        debug_assert!(level >= 1);
        self.level_base_size * self.level_size_multiplier.pow(level as u32 - 1)
    }

    /// Validate invariants that would otherwise surface as runtime oddities
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.memtable_size_limit == 0 {
            return Err(crate::BasaltError::Config(
                "memtable_size_limit must be non-zero".to_string(),
            ));
        }
        if self.max_levels < 2 {
            return Err(crate::BasaltError::Config(
                "max_levels must be at least 2".to_string(),
            ));
        }
        if self.level_size_multiplier < 2 {
            return Err(crate::BasaltError::Config(
                "level_size_multiplier must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the transaction write-set limit (in bytes)
    pub fn max_write_set_bytes(mut self, size: usize) -> Self {
        self.config.max_write_set_bytes = size;
        self
    }

    /// Set the segment block size (in bytes)
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the target output segment size for compaction
    pub fn segment_size_target(mut self, size: u64) -> Self {
        self.config.segment_size_target = size;
        self
    }

    /// Set how many level-0 segments trigger compaction
    pub fn l0_compaction_trigger(mut self, count: usize) -> Self {
        self.config.l0_compaction_trigger = count;
        self
    }

    /// Set the level-1 byte budget
    pub fn level_base_size(mut self, size: u64) -> Self {
        self.config.level_base_size = size;
        self
    }

    /// Enable or disable the background worker
    pub fn background_compaction(mut self, enabled: bool) -> Self {
        self.config.background_compaction = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
