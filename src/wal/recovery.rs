//! WAL Recovery
//!
//! Replays WAL files after a crash. A torn or checksum-invalid tail is
//! truncated: the engine favors "last complete record wins" over failing
//! the open outright.

use std::path::Path;

use tracing::warn;

use crate::error::{BasaltError, Result};

use super::reader::WalReader;
use super::WalEntry;

/// Handles WAL recovery after a crash
pub struct WalRecovery;

/// Result of a recovery pass over one or more WAL files
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Highest sequence number seen in recovered entries
    pub last_seq: u64,

    /// Whether any file had a corrupt tail removed
    pub was_truncated: bool,
}

impl WalRecovery {
    /// Recover entries from a single WAL file.
    ///
    /// Reads complete, checksum-valid entries in order. On the first bad
    /// frame the file is truncated at the last valid offset and recovery
    /// stops there — everything before it is intact and replayable.
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        let mut reader = WalReader::open(path)?;
        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    result.entries_recovered += 1;
                    result.last_seq = result.last_seq.max(entry.last_seq());
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(BasaltError::Corruption(reason)) => {
                    let valid_len = reader.position();
                    warn!(
                        path = %path.display(),
                        valid_len,
                        %reason,
                        "truncating WAL at corrupt tail"
                    );
                    truncate_file(path, valid_len)?;
                    result.was_truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let mut result = RecoveryResult::default();
        let mut reader = WalReader::open(path)?;
        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    result.entries_recovered += 1;
                    result.last_seq = result.last_seq.max(entry.last_seq());
                }
                Ok(None) => break,
                Err(BasaltError::Corruption(_)) => {
                    result.was_truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(result)
    }
}

fn truncate_file(path: &Path, len: u64) -> Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()?;
    Ok(())
}
