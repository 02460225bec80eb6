//! MemTable implementation
//!
//! BTreeMap-based versioned memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::{InternalKey, MemTableEntry};

/// Per-entry bookkeeping overhead added to the size estimate
const ENTRY_OVERHEAD: usize = 24;

/// In-memory table for recent writes.
///
/// Holds every version written during its generation; readers pick the
/// newest version at or below their snapshot. Writers are serialized by
/// the engine's commit lock; the internal RwLock only guards against
/// readers observing a half-applied batch.
pub struct MemTable {
    /// Versioned records: (user key, seq desc) → value or tombstone
    data: RwLock<BTreeMap<InternalKey, MemTableEntry>>,

    /// Approximate size in bytes (keys + payloads + overhead)
    size: AtomicUsize,

    /// Number of record versions
    entry_count: AtomicUsize,

    /// Highest sequence number applied to this table
    max_seq: AtomicU64,

    /// Set when the table is rotated out; writes are a logic error after
    frozen: AtomicBool,

    /// WAL generation backing this table; its log file outlives the table
    /// until the flush is committed to the manifest
    wal_generation: u64,
}

impl MemTable {
    /// Create a new empty MemTable backed by the given WAL generation
    pub fn new(wal_generation: u64) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
            entry_count: AtomicUsize::new(0),
            max_seq: AtomicU64::new(0),
            frozen: AtomicBool::new(false),
            wal_generation,
        }
    }

    /// Insert a record version (write lock)
    pub fn put(&self, key: Vec<u8>, seq: u64, entry: MemTableEntry) {
        debug_assert!(!self.is_frozen(), "write to frozen memtable");

        let added = key.len() + entry.payload_size() + ENTRY_OVERHEAD;
        let mut data = self.data.write();
        data.insert(InternalKey::new(key, seq), entry);
        drop(data);

        self.size.fetch_add(added, Ordering::Relaxed);
        self.entry_count.fetch_add(1, Ordering::Relaxed);
        self.max_seq.fetch_max(seq, Ordering::Relaxed);
    }

    /// Newest record for `key` visible at `snapshot` (read lock).
    ///
    /// Returns the record with the highest seq ≤ snapshot, or `None` if
    /// this table holds no visible version. A returned tombstone means
    /// the key is deleted as of the snapshot — callers must not fall
    /// through to older sources.
    pub fn get(&self, key: &[u8], snapshot: u64) -> Option<(u64, MemTableEntry)> {
        let data = self.data.read();
        let start = InternalKey::new(key.to_vec(), snapshot);
        data.range((Bound::Included(start), Bound::Unbounded))
            .next()
            .filter(|(ikey, _)| ikey.user_key == key)
            .map(|(ikey, entry)| (ikey.seq, entry.clone()))
    }

    /// Collect the newest visible version per key within `bounds`,
    /// in key order. Materialized: the table is bounded by the rotation
    /// threshold, so the copy is small relative to a scan over segments.
    pub fn scan(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        snapshot: u64,
    ) -> Vec<(Vec<u8>, u64, MemTableEntry)> {
        let start = match lower {
            Bound::Included(k) => Bound::Included(InternalKey::new(k.to_vec(), u64::MAX)),
            Bound::Excluded(k) => Bound::Excluded(InternalKey::new(k.to_vec(), 0)),
            Bound::Unbounded => Bound::Unbounded,
        };

        let data = self.data.read();
        let mut out: Vec<(Vec<u8>, u64, MemTableEntry)> = Vec::new();
        for (ikey, entry) in data.range((start, Bound::Unbounded)) {
            match upper {
                Bound::Included(k) if ikey.user_key.as_slice() > k => break,
                Bound::Excluded(k) if ikey.user_key.as_slice() >= k => break,
                _ => {}
            }
            if ikey.seq > snapshot {
                continue;
            }
            // Versions sort newest-first, so the first one ≤ snapshot wins
            if out.last().map(|(k, _, _)| k.as_slice()) == Some(ikey.user_key.as_slice()) {
                continue;
            }
            out.push((ikey.user_key.clone(), ikey.seq, entry.clone()));
        }
        out
    }

    /// Clone out every version in sorted order, for the flush path.
    /// Only called on frozen tables, so the copy is taken exactly once.
    pub fn all_entries(&self) -> Vec<(InternalKey, MemTableEntry)> {
        let data = self.data.read();
        data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Number of record versions
    pub fn entry_count(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    /// Highest sequence number applied
    pub fn max_seq(&self) -> u64 {
        self.max_seq.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Mark the table immutable (called at rotation)
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// WAL generation backing this table
    pub fn wal_generation(&self) -> u64 {
        self.wal_generation
    }
}
