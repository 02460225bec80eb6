//! Segment Reader
//!
//! Opens segment files and answers snapshot point lookups via the
//! in-memory sparse index.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{BasaltError, Result};
use crate::memtable::MemTableEntry;

use super::builder::decode_block;
use super::iterator::SegmentIterator;
use super::{BlockHandle, TableIndex, HEADER_SIZE, MAGIC, TRAILER_SIZE, VERSION};

/// Reader for an immutable segment file.
///
/// The sparse index lives in memory; a lookup binary-searches it and then
/// scans a single block. The file handle sits behind a Mutex so lookups
/// work through `&self` — the lock covers one seek+read, never I/O on
/// other segments.
pub struct SegmentReader {
    path: PathBuf,
    file: Mutex<File>,
    index: TableIndex,
}

impl SegmentReader {
    /// Open a segment, loading and verifying its index
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + TRAILER_SIZE {
            return Err(BasaltError::Corruption(format!(
                "segment {} too small: {} bytes",
                path.display(),
                file_size
            )));
        }

        // Header
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(BasaltError::Corruption(format!(
                "invalid segment magic in {}",
                path.display()
            )));
        }
        let version = u16::from_le_bytes(header[4..6].try_into().unwrap());
        if version != VERSION {
            return Err(BasaltError::Storage(format!(
                "unsupported segment version: {}",
                version
            )));
        }

        // Trailer
        file.seek(SeekFrom::End(-(TRAILER_SIZE as i64)))?;
        let mut trailer = [0u8; TRAILER_SIZE as usize];
        file.read_exact(&mut trailer)?;
        let index_offset = u64::from_le_bytes(trailer[0..8].try_into().unwrap());
        let index_len = u32::from_le_bytes(trailer[8..12].try_into().unwrap()) as usize;
        let index_crc = u32::from_le_bytes(trailer[12..16].try_into().unwrap());

        // Index
        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_bytes = vec![0u8; index_len];
        file.read_exact(&mut index_bytes)?;
        if crc32fast::hash(&index_bytes) != index_crc {
            return Err(BasaltError::Corruption(format!(
                "segment index checksum mismatch in {}",
                path.display()
            )));
        }
        let index: TableIndex = bincode::deserialize(&index_bytes)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
        })
    }

    /// Newest record for `key` visible at `snapshot`.
    ///
    /// Returns:
    /// - `Ok(Some((seq, entry)))` — a visible version; a tombstone entry
    ///   means the key is deleted as of the snapshot
    /// - `Ok(None)` — no visible version in this segment
    /// - `Err(Corruption)` — a block checksum did not match
    pub fn get(&self, key: &[u8], snapshot: u64) -> Result<Option<(u64, MemTableEntry)>> {
        if !self.might_contain(key) {
            return Ok(None);
        }

        // First block whose range can contain the key: the last block with
        // first_key ≤ key. Versions of one key can spill into following
        // blocks, which then start with that same key.
        let mut block_idx = match self
            .index
            .blocks
            .partition_point(|b| b.first_key.as_slice() <= key)
        {
            0 => 0,
            n => n - 1,
        };

        while block_idx < self.index.blocks.len() {
            let handle = &self.index.blocks[block_idx];
            if handle.first_key.as_slice() > key {
                break;
            }

            let records = decode_block(&self.read_block(handle)?)?;
            for (rkey, seq, value) in &records {
                match rkey.as_slice().cmp(key) {
                    std::cmp::Ordering::Less => continue,
                    std::cmp::Ordering::Greater => return Ok(None),
                    std::cmp::Ordering::Equal => {
                        if *seq <= snapshot {
                            let entry = match value {
                                Some(v) => MemTableEntry::Value(v.clone()),
                                None => MemTableEntry::Tombstone,
                            };
                            return Ok(Some((*seq, entry)));
                        }
                        // Too new for this snapshot; older versions follow
                    }
                }
            }

            block_idx += 1;
        }

        Ok(None)
    }

    /// Read and checksum-verify one block
    pub(super) fn read_block(&self, handle: &BlockHandle) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; handle.len as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(handle.offset))?;
            file.read_exact(&mut buf)?;
        }
        if crc32fast::hash(&buf) != handle.crc {
            return Err(BasaltError::Corruption(format!(
                "segment block checksum mismatch in {} at offset {}",
                self.path.display(),
                handle.offset
            )));
        }
        Ok(buf)
    }

    /// Iterate all records in order, from a fresh file handle
    pub fn iter(&self) -> Result<SegmentIterator> {
        SegmentIterator::open(&self.path, self.index.blocks.clone(), 0)
    }

    /// Iterate records starting at the block that can contain `start_key`
    pub fn iter_from(&self, start_key: &[u8]) -> Result<SegmentIterator> {
        let start_block = match self
            .index
            .blocks
            .partition_point(|b| b.first_key.as_slice() <= start_key)
        {
            0 => 0,
            n => n - 1,
        };
        SegmentIterator::open(&self.path, self.index.blocks.clone(), start_block)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn entry_count(&self) -> u64 {
        self.index.entry_count
    }

    pub fn min_key(&self) -> &[u8] {
        &self.index.min_key
    }

    pub fn max_key(&self) -> &[u8] {
        &self.index.max_key
    }

    pub fn max_seq(&self) -> u64 {
        self.index.max_seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Quick range check; false means the key is definitely absent
    pub fn might_contain(&self, key: &[u8]) -> bool {
        key >= self.index.min_key.as_slice() && key <= self.index.max_key.as_slice()
    }
}
