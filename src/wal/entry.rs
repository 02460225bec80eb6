//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.

use serde::{Deserialize, Serialize};

use crate::error::{BasaltError, Result};

/// Frame header: CRC32 (4) + payload length (4)
pub const FRAME_HEADER_SIZE: usize = 8;

/// A single entry in the WAL — one committed transaction batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalEntry {
    /// Sequence number of the first operation in the batch; operation i
    /// carries `first_seq + i`
    pub first_seq: u64,

    /// The committed operations, in write-set key order
    pub operations: Vec<Operation>,
}

/// Operations that can be logged
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key (tombstone)
    Delete { key: Vec<u8> },
}

impl Operation {
    /// The key this operation touches
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } => key,
            Operation::Delete { key } => key,
        }
    }
}

impl WalEntry {
    pub fn new(first_seq: u64, operations: Vec<Operation>) -> Self {
        Self {
            first_seq,
            operations,
        }
    }

    /// Sequence number of the last operation in the batch
    pub fn last_seq(&self) -> u64 {
        self.first_seq + self.operations.len().saturating_sub(1) as u64
    }

    /// Encode as a framed byte buffer: [crc(4)][len(4)][payload]
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let crc = crc32fast::hash(&payload);

        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a payload previously framed by [`encode`], verifying the CRC
    pub fn decode(crc: u32, payload: &[u8]) -> Result<Self> {
        let computed = crc32fast::hash(payload);
        if computed != crc {
            return Err(BasaltError::Corruption(format!(
                "WAL entry checksum mismatch: expected {:08x}, got {:08x}",
                crc, computed
            )));
        }
        Ok(bincode::deserialize(payload)?)
    }
}
