//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Retain every record version until flush (snapshot reads need them)
//! - Track size for rotation triggers
//! - Ordered iteration for segment creation
//!
//! ## Data Structure Choice
//! A BTreeMap keyed by (user key, sequence number descending) wrapped in a
//! RwLock:
//! - Ordered keys (required for segment generation)
//! - Version ordering falls out of the key comparator: for one user key the
//!   newest record sorts first, so a snapshot read is "seek then take one"
//! - Simple and correct first; a skip list can replace it later without
//!   touching callers

mod table;

use std::cmp::Ordering;

pub use table::MemTable;

/// Entry stored in the MemTable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemTableEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

impl MemTableEntry {
    /// Approximate heap size of the entry payload
    pub fn payload_size(&self) -> usize {
        match self {
            MemTableEntry::Value(v) => v.len(),
            MemTableEntry::Tombstone => 0,
        }
    }

    /// Value bytes, or `None` for a tombstone
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            MemTableEntry::Value(v) => Some(v),
            MemTableEntry::Tombstone => None,
        }
    }
}

/// Composite key ordering records by (user key ascending, seq descending).
///
/// With this ordering, all versions of one user key are adjacent and the
/// newest version comes first, so the newest record visible at a snapshot
/// is the first entry at or after `InternalKey { user_key, seq: snapshot }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Vec<u8>,
    pub seq: u64,
}

impl InternalKey {
    pub fn new(user_key: Vec<u8>, seq: u64) -> Self {
        Self { user_key, seq }
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
