//! Storage Module
//!
//! Persistent storage layer: immutable sorted segment files organized
//! into levels, a manifest recording the live set, and the compaction
//! machinery that keeps read amplification bounded.
//!
//! ## Responsibilities
//! - Persist flushed memtables as level-0 segments
//! - Serve snapshot reads across the level hierarchy
//! - Merge levels in the background, reclaiming shadowed versions and
//!   expired tombstones
//! - Survive crashes: segments are write-once, the manifest is the only
//!   mutable metadata and is checksummed per record

mod compaction;
mod level;
mod manifest;
mod manager;
pub mod sstable;

pub use level::{Level, SegmentHandle};
pub use manager::StorageManager;
pub use manifest::{Manifest, ManifestRecord};
pub use sstable::{SegmentBuilder, SegmentIterator, SegmentReader, TableMeta};
