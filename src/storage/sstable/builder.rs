//! Segment Builder
//!
//! Writes sorted versioned records to a new segment file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{BasaltError, Result};

use super::{
    BlockHandle, TableIndex, TableMeta, ENTRY_HEADER_SIZE, HEADER_SIZE, KIND_TOMBSTONE,
    KIND_VALUE, MAGIC, VERSION,
};

/// Builder for creating new segments from sorted versioned records
pub struct SegmentBuilder {
    path: PathBuf,
    id: u64,
    writer: BufWriter<File>,
    /// Target uncompressed block size
    block_size: usize,
    /// Bytes of the block currently being assembled
    block_buf: Vec<u8>,
    /// First key of the current block
    block_first_key: Option<Vec<u8>>,
    /// Completed block handles
    blocks: Vec<BlockHandle>,
    /// Offset where the next block will land
    current_offset: u64,
    entry_count: u64,
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
    max_seq: u64,
    /// Last (key, seq) added, for sort-order assertions
    last_added: Option<(Vec<u8>, u64)>,
}

impl SegmentBuilder {
    /// Create a new segment builder.
    ///
    /// Writes the header immediately; call `add()` in (key asc, seq desc)
    /// order, then `finish()` to write the index and trailer.
    pub fn new(path: &Path, id: u64, block_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            id,
            writer,
            block_size,
            block_buf: Vec::with_capacity(block_size + 256),
            block_first_key: None,
            blocks: Vec::new(),
            current_offset: HEADER_SIZE,
            entry_count: 0,
            min_key: None,
            max_key: None,
            max_seq: 0,
            last_added: None,
        })
    }

    /// Add a record version; `value = None` writes a tombstone.
    ///
    /// Records must arrive in (key ascending, seq descending) order —
    /// exactly the order the memtable and the merge heap produce.
    pub fn add(&mut self, key: &[u8], seq: u64, value: Option<&[u8]>) -> Result<()> {
        if let Some((last_key, last_seq)) = &self.last_added {
            let in_order = match key.cmp(last_key.as_slice()) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => seq < *last_seq,
                std::cmp::Ordering::Less => false,
            };
            if !in_order {
                return Err(BasaltError::Storage(format!(
                    "records for {} must be added in (key, seq desc) order",
                    self.path.display()
                )));
            }
        }
        self.last_added = Some((key.to_vec(), seq));

        if self.block_first_key.is_none() {
            self.block_first_key = Some(key.to_vec());
        }
        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        self.max_key = Some(key.to_vec());
        self.max_seq = self.max_seq.max(seq);

        // Entry: [key_len][val_len][seq][kind][key][value]
        let (kind, val): (u8, &[u8]) = match value {
            Some(v) => (KIND_VALUE, v),
            None => (KIND_TOMBSTONE, &[]),
        };
        self.block_buf
            .extend_from_slice(&(key.len() as u32).to_le_bytes());
        self.block_buf
            .extend_from_slice(&(val.len() as u32).to_le_bytes());
        self.block_buf.extend_from_slice(&seq.to_le_bytes());
        self.block_buf.push(kind);
        self.block_buf.extend_from_slice(key);
        self.block_buf.extend_from_slice(val);

        self.entry_count += 1;

        if self.block_buf.len() >= self.block_size {
            self.finish_block()?;
        }

        Ok(())
    }

    /// Seal the current block: write it out and record its handle
    fn finish_block(&mut self) -> Result<()> {
        if self.block_buf.is_empty() {
            return Ok(());
        }

        let crc = crc32fast::hash(&self.block_buf);
        self.writer.write_all(&self.block_buf)?;

        self.blocks.push(BlockHandle {
            first_key: self.block_first_key.take().unwrap_or_default(),
            offset: self.current_offset,
            len: self.block_buf.len() as u32,
            crc,
        });

        self.current_offset += self.block_buf.len() as u64;
        self.block_buf.clear();
        Ok(())
    }

    /// Bytes written so far, including the block being assembled.
    /// Compaction uses this to split output at the segment size target.
    pub fn estimated_size(&self) -> u64 {
        self.current_offset + self.block_buf.len() as u64
    }

    /// Number of records added so far
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Finish building: seal the last block, write index and trailer,
    /// fsync, and return the segment's metadata.
    pub fn finish(mut self) -> Result<TableMeta> {
        if self.entry_count == 0 {
            return Err(BasaltError::Storage(
                "cannot finish an empty segment".to_string(),
            ));
        }

        self.finish_block()?;

        let index = TableIndex {
            blocks: std::mem::take(&mut self.blocks),
            entry_count: self.entry_count,
            min_key: self.min_key.clone().unwrap_or_default(),
            max_key: self.max_key.clone().unwrap_or_default(),
            max_seq: self.max_seq,
        };

        let index_offset = self.current_offset;
        let index_bytes = bincode::serialize(&index)?;
        let index_crc = crc32fast::hash(&index_bytes);

        self.writer.write_all(&index_bytes)?;

        // Trailer: index_offset (8) + index_len (4) + index_crc (4)
        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer
            .write_all(&(index_bytes.len() as u32).to_le_bytes())?;
        self.writer.write_all(&index_crc.to_le_bytes())?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        let file_size = self.writer.get_ref().metadata()?.len();

        Ok(TableMeta {
            id: self.id,
            entry_count: self.entry_count,
            min_key: index.min_key,
            max_key: index.max_key,
            max_seq: self.max_seq,
            file_size,
        })
    }
}

/// Decode the entries of one verified block buffer
pub(super) fn decode_block(buf: &[u8]) -> Result<Vec<super::VersionedRecord>> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        if pos + ENTRY_HEADER_SIZE > buf.len() {
            return Err(BasaltError::Corruption(
                "segment block entry header out of bounds".to_string(),
            ));
        }
        let key_len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        let val_len = u32::from_le_bytes(buf[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let seq = u64::from_le_bytes(buf[pos + 8..pos + 16].try_into().unwrap());
        let kind = buf[pos + 16];
        pos += ENTRY_HEADER_SIZE;

        if pos + key_len + val_len > buf.len() {
            return Err(BasaltError::Corruption(
                "segment block entry payload out of bounds".to_string(),
            ));
        }
        let key = buf[pos..pos + key_len].to_vec();
        pos += key_len;
        let value = match kind {
            KIND_VALUE => Some(buf[pos..pos + val_len].to_vec()),
            KIND_TOMBSTONE => None,
            other => {
                return Err(BasaltError::Corruption(format!(
                    "unknown segment entry kind: {}",
                    other
                )))
            }
        };
        pos += val_len;

        records.push((key, seq, value));
    }
    Ok(records)
}
