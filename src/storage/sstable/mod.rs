//! Segment Module
//!
//! Sorted segment files - immutable on-disk sorted runs of versioned
//! records. Write-once: a segment is only ever superseded by compaction,
//! never mutated, which is why reads need no locking beyond a shared
//! file handle.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Header (6 bytes)                                         │
//! │   Magic: "BSLT" (4) | Version: u16 (2)                   │
//! ├──────────────────────────────────────────────────────────┤
//! │ Data Blocks (~block_size each, CRC32 per block)          │
//! │   [KeyLen: u32][ValLen: u32][Seq: u64][Kind: u8]         │
//! │   [Key][Value]                                           │
//! │   ... entries in (key asc, seq desc) order ...           │
//! ├──────────────────────────────────────────────────────────┤
//! │ Index (bincode TableIndex)                               │
//! │   per block: first key, offset, length, CRC32            │
//! │   summary: entry count, min/max key, max seq             │
//! ├──────────────────────────────────────────────────────────┤
//! │ Trailer (16 bytes)                                       │
//! │   IndexOffset: u64 | IndexLen: u32 | IndexCRC: u32       │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod iterator;
mod reader;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use builder::SegmentBuilder;
pub use iterator::SegmentIterator;
pub use reader::SegmentReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes identifying a basalt segment file
pub(crate) const MAGIC: &[u8; 4] = b"BSLT";

/// Current segment format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) = 6 bytes
pub(crate) const HEADER_SIZE: u64 = 6;

/// Trailer size: IndexOffset (8) + IndexLen (4) + IndexCRC (4) = 16 bytes
pub(crate) const TRAILER_SIZE: u64 = 16;

/// Per-entry header inside a block: KeyLen (4) + ValLen (4) + Seq (8) + Kind (1)
pub(crate) const ENTRY_HEADER_SIZE: usize = 17;

/// Kind byte values
pub(crate) const KIND_VALUE: u8 = 0;
pub(crate) const KIND_TOMBSTONE: u8 = 1;

// =============================================================================
// Records and metadata
// =============================================================================

/// One versioned record read from or written to a segment.
/// `value == None` means tombstone.
pub type VersionedRecord = (Vec<u8>, u64, Option<Vec<u8>>);

/// Location and checksum of one data block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHandle {
    /// First key stored in the block (sparse index entry)
    pub first_key: Vec<u8>,
    /// Byte offset of the block within the file
    pub offset: u64,
    /// Block length in bytes
    pub len: u32,
    /// CRC32 over the block bytes
    pub crc: u32,
}

/// Sparse index plus summary, serialized into the file footer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TableIndex {
    pub blocks: Vec<BlockHandle>,
    pub entry_count: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub max_seq: u64,
}

/// Segment metadata — the manifest's record of a live segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    /// Segment id; also determines the file name
    pub id: u64,
    /// Number of record versions in the segment
    pub entry_count: u64,
    /// Smallest user key
    pub min_key: Vec<u8>,
    /// Largest user key
    pub max_key: Vec<u8>,
    /// Highest sequence number of any record (recency ordering for L0)
    pub max_seq: u64,
    /// File size in bytes (level size accounting)
    pub file_size: u64,
}

impl TableMeta {
    /// Quick check whether `key` can be in this segment (range check)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }

    /// Whether this segment's key range overlaps [min, max]
    pub fn overlaps(&self, min: &[u8], max: &[u8]) -> bool {
        self.min_key.as_slice() <= max && self.max_key.as_slice() >= min
    }
}

/// File name for a segment id ("000042.sst")
pub fn segment_path(dir: &std::path::Path, id: u64) -> PathBuf {
    dir.join(format!("{:06}.sst", id))
}
