//! # basalt
//!
//! An embedded transactional key-value engine with:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery with partial write handling
//! - Snapshot-isolated optimistic transactions (first-committer-wins)
//! - Leveled background compaction
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Engine (public API)                      │
//! │         one-shot get/put/delete/scan + transactions          │
//! └───────────┬────────────────────────────────┬────────────────┘
//!             │ commit                         │ read at snapshot
//! ┌───────────▼───────────┐         ┌──────────▼──────────────┐
//! │        Oracle         │         │      Read Path          │
//! │  seq numbers, active  │         │  memtables → levels,    │
//! │  snapshots, conflicts │         │  newest wins, tombstone │
//! └───────────┬───────────┘         │  shadowing              │
//!             │                     └──────────┬──────────────┘
//!   ┌─────────▼─────────┐                      │
//!   │        WAL        │           ┌──────────▼──────────────┐
//!   │     (append)      │           │    Segment Levels       │
//!   └─────────┬─────────┘           │  L0 overlapping flushes │
//!             │                     │  L1+ key-disjoint runs  │
//!   ┌─────────▼─────────┐           └──────────▲──────────────┘
//!   │     MemTable      │  flush / compaction  │
//!   │    (versioned)    ├──────────────────────┘
//!   └───────────────────┘     (background worker + manifest)
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use basalt::{Config, Engine};
//!
//! let engine = Engine::open(Config::builder().data_dir("/tmp/db").build())?;
//!
//! let mut txn = engine.begin_txn(false);
//! txn.put(&b"hello"[..], &b"world"[..])?;
//! txn.commit()?;
//!
//! assert_eq!(engine.get(b"hello")?, Some(b"world".to_vec()));
//! engine.close()?;
//! # Ok::<(), basalt::BasaltError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod engine;
pub mod memtable;
mod scan;
pub mod storage;
pub mod txn;
pub mod wal;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, WalSyncStrategy};
pub use engine::Engine;
pub use error::{BasaltError, Result};
pub use scan::Scan;
pub use txn::{Transaction, TxnState};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of basalt
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
