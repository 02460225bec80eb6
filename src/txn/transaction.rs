//! Transaction handle
//!
//! A watermark plus a private write-set. Holds no references into shared
//! mutable structures: reads go through the engine's snapshot read path,
//! writes stay private until commit.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::engine::Engine;
use crate::error::{BasaltError, Result};
use crate::scan::Scan;

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// Per-entry overhead counted against the write-set capacity
const WRITE_ENTRY_OVERHEAD: usize = 32;

/// A snapshot-isolated transaction.
///
/// Created by [`Engine::begin_txn`]. Dropping an uncommitted transaction
/// discards it with no side effects.
pub struct Transaction<'a> {
    engine: &'a Engine,
    watermark: u64,
    read_only: bool,
    /// Pending writes: key → value, `None` for a delete
    write_set: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    write_set_size: usize,
    state: TxnState,
    snapshot_released: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(engine: &'a Engine, watermark: u64, read_only: bool) -> Self {
        Self {
            engine,
            watermark,
            read_only,
            write_set: BTreeMap::new(),
            write_set_size: 0,
            state: TxnState::Active,
            snapshot_released: false,
        }
    }

    /// The snapshot watermark this transaction's reads are pinned to
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Get a value: the transaction's own pending write if any, otherwise
    /// the newest committed version at the watermark
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_active()?;

        if let Some(pending) = self.write_set.get(key) {
            return Ok(pending.clone());
        }
        self.engine.read_at(key, self.watermark)
    }

    /// Buffer a put; no effect is visible until commit
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.insert(key.into(), Some(value.into()))
    }

    /// Buffer a delete; no effect is visible until commit
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> Result<()> {
        self.insert(key.into(), None)
    }

    fn insert(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<()> {
        self.ensure_active()?;
        if self.read_only {
            return Err(BasaltError::ReadOnly);
        }

        let new_payload = value.as_ref().map_or(0, |v| v.len());
        let added = match self.write_set.get(&key) {
            // Replacing an entry only changes the payload share
            Some(old) => new_payload.saturating_sub(old.as_ref().map_or(0, |v| v.len())),
            None => key.len() + new_payload + WRITE_ENTRY_OVERHEAD,
        };

        let limit = self.engine.config().max_write_set_bytes;
        let size = self.write_set_size + added;
        if size > limit {
            return Err(BasaltError::Capacity { size, limit });
        }

        self.write_set_size = size;
        self.write_set.insert(key, value);
        Ok(())
    }

    /// Ordered scan of visible records in `range`, overlaying this
    /// transaction's own pending writes
    pub fn scan(
        &self,
        range: impl std::ops::RangeBounds<Vec<u8>>,
    ) -> Result<Scan> {
        self.ensure_active()?;

        let lower = clone_bound(range.start_bound());
        let upper = clone_bound(range.end_bound());

        let overlay: Vec<(Vec<u8>, Option<Vec<u8>>)> = self
            .write_set
            .range((lower.clone(), upper.clone()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        self.engine
            .scan_at(lower, upper, self.watermark, Some(overlay))
    }

    /// Approximate bytes buffered in the write-set
    pub fn write_set_size(&self) -> usize {
        self.write_set_size
    }

    /// Commit the transaction.
    ///
    /// First-committer-wins: fails with [`BasaltError::Conflict`] if
    /// another transaction committed a write to any of this transaction's
    /// keys after the watermark was taken. On conflict the transaction is
    /// aborted; retry by running the whole transaction again.
    pub fn commit(mut self) -> Result<()> {
        self.ensure_active()?;

        if self.read_only || self.write_set.is_empty() {
            self.finish(TxnState::Committed);
            return Ok(());
        }

        let write_set = std::mem::take(&mut self.write_set);
        match self.engine.commit_write_set(self.watermark, write_set) {
            Ok(_last_seq) => {
                self.finish(TxnState::Committed);
                Ok(())
            }
            Err(e) => {
                self.finish(TxnState::Aborted);
                Err(e)
            }
        }
    }

    /// Abort the transaction, dropping all pending writes
    pub fn discard(mut self) {
        if self.state == TxnState::Active {
            self.finish(TxnState::Aborted);
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxnState::Active {
            return Err(BasaltError::TxnFinished);
        }
        Ok(())
    }

    fn finish(&mut self, state: TxnState) {
        self.state = state;
        if !self.snapshot_released {
            self.engine.oracle().release_snapshot(self.watermark);
            self.snapshot_released = true;
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.snapshot_released {
            self.engine.oracle().release_snapshot(self.watermark);
            self.snapshot_released = true;
        }
    }
}

fn clone_bound(bound: Bound<&Vec<u8>>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(k) => Bound::Included(k.clone()),
        Bound::Excluded(k) => Bound::Excluded(k.clone()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
