//! Levels
//!
//! A level is an ordered set of open segment handles. Level 0 holds raw
//! memtable flushes and may overlap in key range; levels 1 and deeper are
//! key-disjoint within the level.

use std::sync::Arc;

use crate::error::Result;

use super::sstable::{SegmentReader, TableMeta};

/// An open segment: its manifest metadata plus a reader with the loaded index
pub struct SegmentHandle {
    pub meta: TableMeta,
    pub reader: SegmentReader,
}

impl SegmentHandle {
    pub fn open(dir: &std::path::Path, meta: TableMeta) -> Result<Self> {
        let path = super::sstable::segment_path(dir, meta.id);
        let reader = SegmentReader::open(&path)?;
        Ok(Self { meta, reader })
    }
}

/// One level of the segment tree
pub struct Level {
    pub level_num: u32,
    /// Level 0: ordered by max_seq descending (newest flush first).
    /// Level ≥ 1: ordered by min_key ascending, ranges disjoint.
    pub tables: Vec<Arc<SegmentHandle>>,
}

impl Level {
    pub fn new(level_num: u32) -> Self {
        Self {
            level_num,
            tables: Vec::new(),
        }
    }

    /// Total size of all segments in the level, in bytes
    pub fn size(&self) -> u64 {
        self.tables.iter().map(|t| t.meta.file_size).sum()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Insert a segment at its ordered position
    pub fn add_table(&mut self, handle: Arc<SegmentHandle>) {
        if self.level_num == 0 {
            let pos = self
                .tables
                .partition_point(|t| t.meta.max_seq > handle.meta.max_seq);
            self.tables.insert(pos, handle);
        } else {
            let pos = self
                .tables
                .partition_point(|t| t.meta.min_key < handle.meta.min_key);
            self.tables.insert(pos, handle);
        }
    }

    /// Remove a segment by id
    pub fn remove_table(&mut self, id: u64) -> Option<Arc<SegmentHandle>> {
        let index = self.tables.iter().position(|t| t.meta.id == id)?;
        Some(self.tables.remove(index))
    }

    /// Segments whose key range overlaps [min, max], in level order
    pub fn overlapping(&self, min: &[u8], max: &[u8]) -> Vec<Arc<SegmentHandle>> {
        self.tables
            .iter()
            .filter(|t| t.meta.overlaps(min, max))
            .cloned()
            .collect()
    }

    /// The single segment that can contain `key` on a key-disjoint level
    /// (binary search); level 0 callers must scan instead
    pub fn find_table(&self, key: &[u8]) -> Option<&Arc<SegmentHandle>> {
        debug_assert!(self.level_num >= 1);
        let idx = match self
            .tables
            .partition_point(|t| t.meta.min_key.as_slice() <= key)
        {
            0 => return None,
            n => n - 1,
        };
        let table = &self.tables[idx];
        if table.meta.max_key.as_slice() >= key {
            Some(table)
        } else {
            None
        }
    }
}
