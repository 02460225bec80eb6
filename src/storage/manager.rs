//! Storage Manager
//!
//! Owns the segment tree: levels of immutable segment files plus the
//! manifest that records them.
//!
//! ## Responsibilities
//! - Rebuild the level set from the manifest on startup
//! - Turn frozen memtables into level-0 segments
//! - Serve snapshot point lookups across levels, newest → oldest
//! - Run compactions and commit their results atomically
//!
//! ## Concurrency
//! - `levels`: RwLock — readers share it; flush and compaction take the
//!   write lock only for the metadata swap, never across file I/O
//! - `manifest`: Mutex — appends are rare and already serialized by the
//!   flush/compaction paths
//! - `next_table_id`: atomic counter (lock-free)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{BasaltError, Result};
use crate::memtable::{MemTable, MemTableEntry};

use super::compaction::{self, Merger, RetentionFilter};
use super::level::{Level, SegmentHandle};
use super::manifest::{Manifest, ManifestRecord};
use super::sstable::{segment_path, SegmentBuilder, SegmentIterator, TableMeta};

/// Manages the persistent storage layer
pub struct StorageManager {
    /// Directory where segment files are stored
    dir: PathBuf,

    config: Config,

    /// The level set; index 0 is level 0
    levels: RwLock<Vec<Level>>,

    manifest: Mutex<Manifest>,

    /// Next id for creating new segments (atomic, lock-free)
    next_table_id: AtomicU64,
}

impl StorageManager {
    const MANIFEST_FILENAME: &'static str = "MANIFEST";
    const SEGMENT_DIR: &'static str = "sstables";

    /// Open or create storage under the config's data directory.
    ///
    /// Returns the manager and the highest sequence number recorded in any
    /// live segment — the durable floor for the engine's sequence counter.
    pub fn open(config: &Config) -> Result<(Self, u64)> {
        let dir = config.data_dir.join(Self::SEGMENT_DIR);
        fs::create_dir_all(&dir)?;

        let manifest_path = config.data_dir.join(Self::MANIFEST_FILENAME);
        let (manifest, records) = Manifest::open(&manifest_path)?;

        // Replay the manifest into the live table set
        let mut live: Vec<(u32, TableMeta)> = Vec::new();
        let mut max_id = 0u64;
        for record in records {
            match record {
                ManifestRecord::Flush { level, meta, .. } => {
                    max_id = max_id.max(meta.id);
                    live.push((level, meta));
                }
                ManifestRecord::Compaction {
                    deleted,
                    added_level,
                    added,
                } => {
                    live.retain(|(level, meta)| !deleted.contains(&(*level, meta.id)));
                    for meta in added {
                        max_id = max_id.max(meta.id);
                        live.push((added_level, meta));
                    }
                }
            }
        }

        let mut levels: Vec<Level> = (0..config.max_levels as u32).map(Level::new).collect();
        let mut last_seq = 0u64;
        for (level, meta) in live {
            last_seq = last_seq.max(meta.max_seq);
            let handle = SegmentHandle::open(&dir, meta)?;
            // A shrunk max_levels setting folds deeper levels into the last
            let idx = (level as usize).min(levels.len() - 1);
            levels[idx].add_table(Arc::new(handle));
        }

        let table_count: usize = levels.iter().map(Level::len).sum();
        if table_count > 0 {
            info!(tables = table_count, last_seq, "opened segment tree");
        }

        Ok((
            Self {
                dir,
                config: config.clone(),
                levels: RwLock::new(levels),
                manifest: Mutex::new(manifest),
                next_table_id: AtomicU64::new(max_id + 1),
            },
            last_seq,
        ))
    }

    /// Flush a frozen memtable into a new level-0 segment.
    ///
    /// The segment is fully written and fsynced, then the manifest records
    /// it (releasing the table's WAL generation), then it becomes visible.
    pub fn flush_memtable(&self, memtable: &MemTable) -> Result<TableMeta> {
        if memtable.is_empty() {
            return Err(BasaltError::Storage(
                "cannot flush an empty memtable".to_string(),
            ));
        }

        let id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        let path = segment_path(&self.dir, id);

        let mut builder = SegmentBuilder::new(&path, id, self.config.block_size)?;
        for (ikey, entry) in memtable.all_entries() {
            match entry {
                MemTableEntry::Value(v) => builder.add(&ikey.user_key, ikey.seq, Some(&v))?,
                MemTableEntry::Tombstone => builder.add(&ikey.user_key, ikey.seq, None)?,
            }
        }
        let meta = builder.finish()?;

        self.manifest.lock().append(&ManifestRecord::Flush {
            level: 0,
            meta: meta.clone(),
            wal_generation: memtable.wal_generation(),
        })?;

        let handle = SegmentHandle::open(&self.dir, meta.clone())?;
        self.levels.write()[0].add_table(Arc::new(handle));

        debug!(
            id,
            entries = meta.entry_count,
            bytes = meta.file_size,
            "flushed memtable to level 0"
        );

        Ok(meta)
    }

    /// Newest record for `key` visible at `snapshot`, searching level 0
    /// newest → oldest, then each deeper level's single candidate segment.
    pub fn get(&self, key: &[u8], snapshot: u64) -> Result<Option<(u64, MemTableEntry)>> {
        let levels = self.levels.read();

        for table in &levels[0].tables {
            if !table.meta.might_contain(key) {
                continue;
            }
            if let Some(found) = table.reader.get(key, snapshot)? {
                return Ok(Some(found));
            }
        }

        for level in levels.iter().skip(1) {
            if let Some(table) = level.find_table(key) {
                if let Some(found) = table.reader.get(key, snapshot)? {
                    return Ok(Some(found));
                }
            }
        }

        Ok(None)
    }

    /// Iterators over every segment overlapping [min, max], ordered
    /// newest-source-first (level 0 by recency, then deeper levels).
    /// Opened under the levels read lock so a concurrent compaction
    /// cannot unlink a file before its iterator holds it open.
    pub fn scan_iterators(
        &self,
        min: Option<&[u8]>,
        max: Option<&[u8]>,
    ) -> Result<Vec<SegmentIterator>> {
        let levels = self.levels.read();
        let mut iterators = Vec::new();

        for level in levels.iter() {
            for table in &level.tables {
                let overlaps = match (min, max) {
                    (Some(lo), Some(hi)) => table.meta.overlaps(lo, hi),
                    (Some(lo), None) => table.meta.max_key.as_slice() >= lo,
                    (None, Some(hi)) => table.meta.min_key.as_slice() <= hi,
                    (None, None) => true,
                };
                if !overlaps {
                    continue;
                }
                let iter = match min {
                    Some(lo) => table.reader.iter_from(lo)?,
                    None => table.reader.iter()?,
                };
                iterators.push(iter);
            }
        }

        Ok(iterators)
    }

    /// Level that currently exceeds its compaction trigger, if any
    pub fn needs_compaction(&self) -> Option<usize> {
        let levels = self.levels.read();
        compaction::pick_level(&levels, &self.config)
    }

    /// Run one compaction if any level is over budget.
    ///
    /// `oldest_snapshot` is the lowest watermark any active transaction
    /// holds; versions above it are never garbage-collected. Returns true
    /// if a compaction ran.
    pub fn compact_once(&self, oldest_snapshot: u64) -> Result<bool> {
        // Plan under the read lock, merge without any lock, then swap
        let (plan, drop_tombstones) = {
            let levels = self.levels.read();
            let source = match compaction::pick_level(&levels, &self.config) {
                Some(level) => level,
                None => return Ok(false),
            };
            let plan = match compaction::plan(&levels, source) {
                Some(plan) => plan,
                None => return Ok(false),
            };
            let bottom = compaction::writes_bottom_of_range(&levels, &plan);
            (plan, bottom)
        };

        info!(
            source_level = plan.source_level,
            target_level = plan.target_level,
            inputs = plan.inputs.len(),
            drop_tombstones,
            "starting compaction"
        );

        // Merge inputs into new target-level segments
        let mut sources = Vec::with_capacity(plan.inputs.len());
        for table in &plan.inputs {
            sources.push(table.reader.iter()?);
        }
        let mut merger = Merger::new(sources)?;
        let mut filter = RetentionFilter::new(oldest_snapshot, drop_tombstones);

        let mut outputs: Vec<TableMeta> = Vec::new();
        let mut builder: Option<SegmentBuilder> = None;
        let mut last_key: Option<Vec<u8>> = None;

        while let Some(record) = merger.next_record()? {
            if !filter.keep(&record) {
                continue;
            }
            let (key, seq, value) = record;

            // Split output at the size target, but never between versions
            // of one key — deeper levels must stay key-disjoint
            let key_changed = last_key.as_deref() != Some(key.as_slice());
            let over_target = builder
                .as_ref()
                .map(|b| b.estimated_size() >= self.config.segment_size_target)
                .unwrap_or(false);
            if key_changed && over_target {
                if let Some(b) = builder.take() {
                    outputs.push(b.finish()?);
                }
            }

            if builder.is_none() {
                let id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
                builder = Some(SegmentBuilder::new(
                    &segment_path(&self.dir, id),
                    id,
                    self.config.block_size,
                )?);
            }
            if let Some(b) = builder.as_mut() {
                b.add(&key, seq, value.as_deref())?;
            }
            last_key = Some(key);
        }
        if let Some(b) = builder.take() {
            outputs.push(b.finish()?);
        }

        // Commit: manifest first, then the in-memory swap, then unlink
        self.manifest.lock().append(&ManifestRecord::Compaction {
            deleted: plan.input_ids.clone(),
            added_level: plan.target_level as u32,
            added: outputs.clone(),
        })?;

        let mut new_handles = Vec::with_capacity(outputs.len());
        for meta in &outputs {
            new_handles.push(Arc::new(SegmentHandle::open(&self.dir, meta.clone())?));
        }

        {
            let mut levels = self.levels.write();
            for (level, id) in &plan.input_ids {
                levels[*level as usize].remove_table(*id);
            }
            for handle in new_handles {
                levels[plan.target_level].add_table(handle);
            }
        }

        for (_, id) in &plan.input_ids {
            let path = segment_path(&self.dir, *id);
            if let Err(e) = fs::remove_file(&path) {
                // The manifest no longer references it; a leftover file is
                // harmless and removable by hand
                debug!(path = %path.display(), error = %e, "failed to remove retired segment");
            }
        }

        info!(
            outputs = outputs.len(),
            target_level = plan.target_level,
            "compaction committed"
        );

        Ok(true)
    }

    // =========================================================================
    // Accessors (for tests and the engine)
    // =========================================================================

    /// Total number of live segments
    pub fn table_count(&self) -> usize {
        self.levels.read().iter().map(Level::len).sum()
    }

    /// Number of segments at one level
    pub fn level_table_count(&self, level: usize) -> usize {
        self.levels.read()[level].len()
    }

    /// The segment directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
