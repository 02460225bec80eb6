//! Error types for basalt
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using BasaltError
pub type Result<T> = std::result::Result<T, BasaltError>;

/// Unified error type for basalt operations
#[derive(Debug, Error)]
pub enum BasaltError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    /// A checksum mismatch in a segment block, WAL frame, or manifest record.
    /// The affected file is unreadable past the corrupted region.
    #[error("corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    /// Another transaction committed a conflicting write after this
    /// transaction's watermark. Retry the whole transaction.
    #[error("transaction conflict, retry the transaction")]
    Conflict,

    /// The transaction's write-set exceeded the configured limit.
    /// Commit what is buffered and continue in a new transaction.
    #[error("transaction write-set too large: {size} bytes (limit {limit})")]
    Capacity { size: usize, limit: usize },

    /// A mutation was attempted on a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// An operation was attempted on a transaction that already
    /// committed or aborted.
    #[error("transaction is no longer active")]
    TxnFinished,

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for BasaltError {
    fn from(err: bincode::Error) -> Self {
        BasaltError::Serialization(err.to_string())
    }
}

impl BasaltError {
    /// Whether the caller can reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BasaltError::Conflict)
    }
}
