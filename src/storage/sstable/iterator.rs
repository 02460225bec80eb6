//! Segment Iterator
//!
//! Sequential iteration over all records in a segment, block by block.
//! Owns its file handle, so iterators from the same segment do not
//! contend with point lookups.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{BasaltError, Result};

use super::builder::decode_block;
use super::{BlockHandle, VersionedRecord};

/// Iterator over segment records in (key asc, seq desc) order
pub struct SegmentIterator {
    file: File,
    /// Blocks not yet loaded, front is next
    blocks: VecDeque<BlockHandle>,
    /// Records decoded from the current block
    current: VecDeque<VersionedRecord>,
    /// Set after an I/O or checksum failure; iteration fuses
    failed: bool,
}

impl SegmentIterator {
    pub(super) fn open(
        path: &Path,
        blocks: Vec<BlockHandle>,
        start_block: usize,
    ) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file,
            blocks: blocks.into_iter().skip(start_block).collect(),
            current: VecDeque::new(),
            failed: false,
        })
    }

    /// Load and verify the next block into `current`
    fn load_next_block(&mut self) -> Result<bool> {
        let handle = match self.blocks.pop_front() {
            Some(h) => h,
            None => return Ok(false),
        };

        let mut buf = vec![0u8; handle.len as usize];
        self.file.seek(SeekFrom::Start(handle.offset))?;
        self.file.read_exact(&mut buf)?;

        if crc32fast::hash(&buf) != handle.crc {
            return Err(BasaltError::Corruption(format!(
                "segment block checksum mismatch at offset {}",
                handle.offset
            )));
        }

        self.current = decode_block(&buf)?.into();
        Ok(true)
    }
}

impl Iterator for SegmentIterator {
    type Item = Result<VersionedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(record) = self.current.pop_front() {
                return Some(Ok(record));
            }
            match self.load_next_block() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
