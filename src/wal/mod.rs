//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append a commit's records before they reach the memtable
//! - CRC32 checksums for corruption detection
//! - Sequence numbers for total ordering across restarts
//! - Crash recovery: replay complete entries, truncate partial tails
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Entry 1                                 │
//! │ ┌─────────┬─────────┬────────────────┐  │
//! │ │ CRC (4) │ Len (4) │ Payload        │  │
//! │ └─────────┴─────────┴────────────────┘  │
//! ├─────────────────────────────────────────┤
//! │ Entry 2                                 │
//! │ ...                                     │
//! └─────────────────────────────────────────┘
//! ```
//! Payload is a bincode-encoded [`WalEntry`]: the first sequence number of
//! the commit plus its ordered operations. One WAL file exists per memtable
//! generation; a file is deleted only once its generation's flush has been
//! committed to the manifest.

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{Operation, WalEntry, FRAME_HEADER_SIZE};
pub use reader::WalReader;
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::WalWriter;

use std::path::{Path, PathBuf};

/// File name for the WAL of a given memtable generation
pub fn wal_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{:06}.wal", generation))
}

/// Parse a generation id out of a WAL file name ("000042.wal" → Some(42))
pub fn parse_wal_generation(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != "wal" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// List WAL generations present in a directory, oldest first
pub fn list_wal_generations(dir: &Path) -> crate::error::Result<Vec<u64>> {
    let mut generations = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            if let Some(generation) = parse_wal_generation(&path) {
                generations.push(generation);
            }
        }
    }
    generations.sort_unstable();
    Ok(generations)
}
