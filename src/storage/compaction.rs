//! Compaction
//!
//! Leveled compaction: pick a source level over budget, merge its chosen
//! segments with every overlapping segment one level down, and write the
//! result as key-disjoint segments at the target level. Input segments
//! stay on disk until the manifest records the swap.
//!
//! Version retention during the merge:
//! - every version newer than the oldest active snapshot is kept (some
//!   live transaction may still be pinned to it)
//! - of the versions at or below that snapshot, only the newest survives
//! - a surviving tombstone is dropped entirely when the merge writes into
//!   the bottommost populated range, where no older level can still hold
//!   the key it shadows

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;

use super::level::{Level, SegmentHandle};
use super::sstable::{SegmentIterator, VersionedRecord};

/// A chosen compaction: inputs ordered newest-first (rank order)
pub(crate) struct CompactionPlan {
    pub source_level: usize,
    pub target_level: usize,
    /// (level, id) of every input, for the manifest delete list
    pub input_ids: Vec<(u32, u64)>,
    /// Input handles, newer sources before older ones
    pub inputs: Vec<Arc<SegmentHandle>>,
    /// Key range covered by the inputs
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
}

/// Decide whether any level needs compaction, preferring level 0
pub(crate) fn pick_level(levels: &[Level], config: &Config) -> Option<usize> {
    if levels[0].len() >= config.l0_compaction_trigger {
        return Some(0);
    }
    for (n, level) in levels.iter().enumerate().skip(1) {
        // The last level has nowhere to compact into
        if n + 1 >= levels.len() {
            break;
        }
        if level.size() > config.level_size_limit(n) {
            return Some(n);
        }
    }
    None
}

/// Build the input set for compacting `source_level`.
///
/// Level 0 compacts wholesale (its segments overlap each other); a deeper
/// level contributes its largest segment. Either way, every overlapping
/// segment in the target level joins the merge.
pub(crate) fn plan(levels: &[Level], source_level: usize) -> Option<CompactionPlan> {
    let target_level = source_level + 1;
    debug_assert!(target_level < levels.len());

    let source_tables: Vec<Arc<SegmentHandle>> = if source_level == 0 {
        levels[0].tables.clone()
    } else {
        levels[source_level]
            .tables
            .iter()
            .max_by_key(|t| t.meta.file_size)
            .cloned()
            .into_iter()
            .collect()
    };
    if source_tables.is_empty() {
        return None;
    }

    let min_key = source_tables
        .iter()
        .map(|t| t.meta.min_key.clone())
        .min()
        .unwrap_or_default();
    let max_key = source_tables
        .iter()
        .map(|t| t.meta.max_key.clone())
        .max()
        .unwrap_or_default();

    let target_tables = levels[target_level].overlapping(&min_key, &max_key);

    let mut input_ids = Vec::new();
    for t in &source_tables {
        input_ids.push((source_level as u32, t.meta.id));
    }
    for t in &target_tables {
        input_ids.push((target_level as u32, t.meta.id));
    }

    // Rank order: L0 tables are already newest-first; target-level tables
    // hold strictly older data than anything in the source level
    let mut inputs = source_tables;
    inputs.extend(target_tables);

    Some(CompactionPlan {
        source_level,
        target_level,
        input_ids,
        inputs,
        min_key,
        max_key,
    })
}

/// Whether any level below `target_level` still holds keys in the plan's
/// range. If not, the merge writes the oldest data for that range and may
/// drop tombstones (subject to the snapshot watermark).
pub(crate) fn writes_bottom_of_range(levels: &[Level], plan: &CompactionPlan) -> bool {
    levels
        .iter()
        .skip(plan.target_level + 1)
        .all(|level| level.overlapping(&plan.min_key, &plan.max_key).is_empty())
}

// =============================================================================
// K-way merge
// =============================================================================

struct HeapItem {
    record: VersionedRecord,
    /// Source index; lower = newer source, wins seq ties
    rank: usize,
}

impl HeapItem {
    /// Merge order: key ascending, then seq descending, then rank
    fn cmp_order(&self, other: &Self) -> Ordering {
        self.record
            .0
            .cmp(&other.record.0)
            .then_with(|| other.record.1.cmp(&self.record.1))
            .then_with(|| self.rank.cmp(&other.rank))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_order(other) == Ordering::Equal
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    // BinaryHeap is a max-heap; invert so the smallest merge key pops first
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_order(other).reverse()
    }
}

/// K-way merge over segment iterators producing records in
/// (key asc, seq desc) order, deduplicating exact (key, seq) doubles
/// that WAL-replay flushes can leave behind.
pub(crate) struct Merger {
    sources: Vec<SegmentIterator>,
    heap: BinaryHeap<HeapItem>,
    last: Option<(Vec<u8>, u64)>,
}

impl Merger {
    pub(crate) fn new(sources: Vec<SegmentIterator>) -> Result<Self> {
        let mut merger = Self {
            sources,
            heap: BinaryHeap::new(),
            last: None,
        };
        for rank in 0..merger.sources.len() {
            merger.advance(rank)?;
        }
        Ok(merger)
    }

    /// Pull the next record from source `rank` onto the heap
    fn advance(&mut self, rank: usize) -> Result<()> {
        if let Some(record) = self.sources[rank].next() {
            self.heap.push(HeapItem {
                record: record?,
                rank,
            });
        }
        Ok(())
    }

    pub(crate) fn next_record(&mut self) -> Result<Option<VersionedRecord>> {
        loop {
            let item = match self.heap.pop() {
                Some(item) => item,
                None => return Ok(None),
            };
            self.advance(item.rank)?;

            let identity = (item.record.0.clone(), item.record.1);
            if self.last.as_ref() == Some(&identity) {
                continue; // exact duplicate from an older source
            }
            self.last = Some(identity);
            return Ok(Some(item.record));
        }
    }
}

/// Streaming retention filter applied to the merged record sequence
pub(crate) struct RetentionFilter {
    oldest_snapshot: u64,
    drop_tombstones: bool,
    current_key: Option<Vec<u8>>,
    kept_visible: bool,
}

impl RetentionFilter {
    pub(crate) fn new(oldest_snapshot: u64, drop_tombstones: bool) -> Self {
        Self {
            oldest_snapshot,
            drop_tombstones,
            current_key: None,
            kept_visible: false,
        }
    }

    /// Whether a merged record survives compaction.
    /// Must be fed records in (key asc, seq desc) order.
    pub(crate) fn keep(&mut self, record: &VersionedRecord) -> bool {
        let (key, seq, value) = record;

        if self.current_key.as_deref() != Some(key.as_slice()) {
            self.current_key = Some(key.clone());
            self.kept_visible = false;
        }

        if *seq > self.oldest_snapshot {
            // Some active snapshot may still need this exact version
            return true;
        }

        if self.kept_visible {
            // Shadowed by a newer version every snapshot can already see
            return false;
        }
        self.kept_visible = true;

        if value.is_none() && self.drop_tombstones {
            // Nothing below can resurrect the key; the tombstone retires
            return false;
        }
        true
    }
}
