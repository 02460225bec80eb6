//! Manifest
//!
//! Append-only log of segment-set changes. Replaying it reconstructs the
//! live segment tree on open. Each record is framed the same way as a WAL
//! entry ([crc][len][bincode payload]); a torn trailing record from a
//! crash is truncated on replay.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BasaltError, Result};

use super::sstable::TableMeta;

const FRAME_HEADER_SIZE: usize = 8;

/// One durable change to the segment set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ManifestRecord {
    /// A memtable flush produced one level-0 segment; the named WAL
    /// generation is no longer needed once this record is durable
    Flush {
        level: u32,
        meta: TableMeta,
        wal_generation: u64,
    },

    /// A compaction atomically retired `deleted` and installed `added`.
    /// Readers never observe a state with only half of this applied.
    Compaction {
        deleted: Vec<(u32, u64)>,
        added_level: u32,
        added: Vec<TableMeta>,
    },
}

/// Append-only manifest file
pub struct Manifest {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Manifest {
    /// Open (or create) the manifest, replaying existing records.
    ///
    /// A checksum-invalid tail is truncated, mirroring WAL recovery:
    /// everything before the torn record is a consistent history.
    pub fn open(path: &Path) -> Result<(Self, Vec<ManifestRecord>)> {
        let mut records = Vec::new();
        let mut valid_len = 0u64;

        if path.exists() {
            let mut file = File::open(path)?;
            loop {
                match read_record(&mut file) {
                    Ok(Some((record, frame_len))) => {
                        valid_len += frame_len;
                        records.push(record);
                    }
                    Ok(None) => break,
                    Err(BasaltError::Corruption(reason)) => {
                        warn!(
                            path = %path.display(),
                            valid_len,
                            %reason,
                            "truncating manifest at corrupt tail"
                        );
                        let f = OpenOptions::new().write(true).open(path)?;
                        f.set_len(valid_len)?;
                        f.sync_all()?;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok((
            Self {
                path: path.to_path_buf(),
                writer: BufWriter::new(file),
            },
            records,
        ))
    }

    /// Append a record and fsync it. Metadata changes are rare and must
    /// be durable before their side effects (file deletions) happen.
    pub fn append(&mut self, record: &ManifestRecord) -> Result<()> {
        let payload = bincode::serialize(record)?;
        let crc = crc32fast::hash(&payload);

        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer
            .write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read one framed record; `Ok(None)` at clean EOF, `Corruption` on a
/// torn or checksum-invalid frame
fn read_record(file: &mut File) -> Result<Option<(ManifestRecord, u64)>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..])?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(BasaltError::Corruption(
                    "truncated manifest frame header".to_string(),
                ))
            };
        }
        filled += n;
    }

    let crc = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;

    let mut payload = vec![0u8; len];
    if let Err(e) = file.read_exact(&mut payload) {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(BasaltError::Corruption(
                "truncated manifest frame payload".to_string(),
            ));
        }
        return Err(e.into());
    }

    if crc32fast::hash(&payload) != crc {
        return Err(BasaltError::Corruption(
            "manifest record checksum mismatch".to_string(),
        ));
    }

    let record = bincode::deserialize(&payload)?;
    Ok(Some((record, (FRAME_HEADER_SIZE + len) as u64)))
}
