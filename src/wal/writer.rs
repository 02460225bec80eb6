//! WAL Writer
//!
//! Handles appending entries to a WAL file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::Result;

use super::WalEntry;

/// Writes entries to a single WAL file
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    sync_strategy: WalSyncStrategy,
    /// Entries appended since the last fsync
    unsynced: usize,
    /// Byte offset the next entry will be written at
    offset: u64,
}

impl WalWriter {
    /// Open or create a WAL file, appending to existing content
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            sync_strategy,
            unsynced: 0,
            offset,
        })
    }

    /// Append an entry, returning the offset it became durable at.
    ///
    /// Durability depends on the sync strategy: with `EveryWrite` the entry
    /// is fsynced before return, with `EveryNEntries` it may still sit in
    /// the OS cache until the next sync point.
    pub fn append(&mut self, entry: &WalEntry) -> Result<u64> {
        let frame = entry.encode()?;
        let entry_offset = self.offset;

        self.writer.write_all(&frame)?;
        self.offset += frame.len() as u64;
        self.unsynced += 1;

        match self.sync_strategy {
            WalSyncStrategy::EveryWrite => self.sync()?,
            WalSyncStrategy::EveryNEntries { count } => {
                if self.unsynced >= count {
                    self.sync()?;
                }
            }
        }

        Ok(entry_offset)
    }

    /// Force all buffered entries to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Current end-of-log offset
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
