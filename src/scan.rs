//! Merged range scans
//!
//! A forward-only, key-ordered merge over every source that can hold
//! visible records: a transaction's write-set overlay, the active and
//! frozen memtables, and all overlapping segments. Newest-wins and
//! tombstone shadowing are applied while merging, so callers only see
//! live records.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::Bound;

use crate::error::Result;
use crate::txn::SnapshotGuard;

/// (key, seq, value-or-tombstone) pulled from one source
pub(crate) type SourceRecord = (Vec<u8>, u64, Option<Vec<u8>>);

/// One ordered stream of records. Sources are ranked by recency: rank 0
/// is newest and wins (key, seq) ties.
pub(crate) type RecordSource = Box<dyn Iterator<Item = Result<SourceRecord>>>;

struct HeapItem {
    key: Vec<u8>,
    seq: u64,
    value: Option<Vec<u8>>,
    rank: usize,
}

impl HeapItem {
    fn order(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.seq.cmp(&self.seq))
            .then_with(|| self.rank.cmp(&other.rank))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.order(other) == Ordering::Equal
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    // BinaryHeap is a max-heap; invert so the smallest key pops first
    fn cmp(&self, other: &Self) -> Ordering {
        self.order(other).reverse()
    }
}

/// Lazily-merged, forward-only sequence of visible records in key order.
///
/// Yields `(key, value)` pairs; deleted and shadowed records are skipped
/// during the merge. Not restartable: once consumed, request a new scan.
pub struct Scan {
    sources: Vec<RecordSource>,
    heap: BinaryHeap<HeapItem>,
    snapshot: u64,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    /// Last user key yielded or shadowed; older versions of it are skipped
    last_key: Option<Vec<u8>>,
    done: bool,
    /// Keeps the snapshot registered while the scan is alive, so
    /// compaction cannot reclaim versions this scan still needs
    _guard: SnapshotGuard,
}

impl Scan {
    pub(crate) fn new(
        sources: Vec<RecordSource>,
        snapshot: u64,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        guard: SnapshotGuard,
    ) -> Result<Self> {
        let mut scan = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            snapshot,
            lower,
            upper,
            last_key: None,
            done: false,
            _guard: guard,
        };
        for rank in 0..scan.sources.len() {
            scan.advance(rank)?;
        }
        Ok(scan)
    }

    /// Pull the next in-bounds, snapshot-visible record from source `rank`
    fn advance(&mut self, rank: usize) -> Result<()> {
        while let Some(record) = self.sources[rank].next() {
            let (key, seq, value) = record?;
            if seq > self.snapshot {
                continue;
            }
            let below_lower = match &self.lower {
                Bound::Included(lo) => key < *lo,
                Bound::Excluded(lo) => key <= *lo,
                Bound::Unbounded => false,
            };
            if below_lower {
                continue;
            }
            self.heap.push(HeapItem {
                key,
                seq,
                value,
                rank,
            });
            return Ok(());
        }
        Ok(())
    }

    fn past_upper(&self, key: &[u8]) -> bool {
        match &self.upper {
            Bound::Included(hi) => key > hi.as_slice(),
            Bound::Excluded(hi) => key >= hi.as_slice(),
            Bound::Unbounded => false,
        }
    }
}

impl Iterator for Scan {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let item = self.heap.pop()?;
            if let Err(e) = self.advance(item.rank) {
                self.done = true;
                return Some(Err(e));
            }

            // Heap pops in global key order, so the first key past the
            // upper bound ends the scan
            if self.past_upper(&item.key) {
                self.done = true;
                return None;
            }

            // Older version of a key already decided (yielded or deleted)
            if self.last_key.as_deref() == Some(item.key.as_slice()) {
                continue;
            }
            self.last_key = Some(item.key.clone());

            match item.value {
                Some(value) => return Some(Ok((item.key, value))),
                None => continue, // tombstone shadows everything older
            }
        }
    }
}
