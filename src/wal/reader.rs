//! WAL Reader
//!
//! Sequential reads of entries from a WAL file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{BasaltError, Result};

use super::entry::FRAME_HEADER_SIZE;
use super::WalEntry;

/// Reads entries from a WAL file front to back
pub struct WalReader {
    reader: BufReader<File>,
    /// Byte offset of the next frame
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Byte offset of the next unread frame — after a clean read sequence
    /// this is the durable length of the log
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next entry.
    ///
    /// Returns:
    /// - `Ok(Some(entry))` — a complete, checksum-valid entry
    /// - `Ok(None)` — clean end of log
    /// - `Err(Corruption)` — a torn or corrupted frame; `position()` still
    ///   points at its start, which is where recovery truncates
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        match read_exact_or_eof(&mut self.reader, &mut header)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Partial => {
                return Err(BasaltError::Corruption(
                    "truncated WAL frame header".to_string(),
                ))
            }
            ReadOutcome::Complete => {}
        }

        let crc = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;

        let mut payload = vec![0u8; len];
        match read_exact_or_eof(&mut self.reader, &mut payload)? {
            ReadOutcome::Eof | ReadOutcome::Partial => {
                return Err(BasaltError::Corruption(
                    "truncated WAL frame payload".to_string(),
                ))
            }
            ReadOutcome::Complete => {}
        }

        let entry = WalEntry::decode(crc, &payload)?;
        self.position += (FRAME_HEADER_SIZE + len) as u64;
        Ok(Some(entry))
    }

    /// Iterate over entries until clean EOF or the first bad frame
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            failed: false,
        }
    }
}

enum ReadOutcome {
    Complete,
    Partial,
    Eof,
}

/// Like `read_exact` but distinguishes "nothing left" from "cut short"
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(if filled == 0 {
                ReadOutcome::Eof
            } else {
                ReadOutcome::Partial
            });
        }
        filled += n;
    }
    Ok(ReadOutcome::Complete)
}

/// Iterator over WAL entries; fuses after the first error
pub struct WalIterator {
    reader: WalReader,
    failed: bool,
}

impl WalIterator {
    /// Offset past the last successfully read entry
    pub fn valid_position(&self) -> u64 {
        self.reader.position()
    }
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
