//! Commit oracle
//!
//! Hands out sequence numbers, tracks active snapshots, and detects
//! write conflicts at commit time.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{BasaltError, Result};

/// A committed transaction retained for conflict checks until every
/// transaction that could conflict with it has finished
struct CommittedTxn {
    /// Highest sequence number the commit was assigned
    last_seq: u64,
    /// Keys the commit wrote
    keys: HashSet<Vec<u8>>,
}

#[derive(Default)]
struct OracleInner {
    /// Watermark → number of active transactions pinned to it
    active_snapshots: BTreeMap<u64, usize>,
    /// Recent commits, oldest first, pruned below the oldest active
    /// watermark (no future committer can hold an older one)
    recent_commits: VecDeque<CommittedTxn>,
}

/// Sequence-number authority and conflict detector.
///
/// `check_conflict`, `allocate_seqs`, `record_commit`, and `publish` are
/// only called under the engine's commit lock, which is what makes the
/// check-then-assign sequence atomic. Snapshot registration is safe from
/// any thread.
pub struct Oracle {
    /// Next sequence number to hand out
    next_seq: AtomicU64,
    /// Highest sequence number whose commit is fully applied — the
    /// watermark new snapshots are pinned to
    last_committed: AtomicU64,
    inner: Mutex<OracleInner>,
}

impl Oracle {
    /// Create an oracle resuming after `last_seq`
    pub fn new(last_seq: u64) -> Self {
        Self {
            next_seq: AtomicU64::new(last_seq + 1),
            last_committed: AtomicU64::new(last_seq),
            inner: Mutex::new(OracleInner::default()),
        }
    }

    /// Highest fully committed sequence number
    pub fn last_committed(&self) -> u64 {
        self.last_committed.load(Ordering::Acquire)
    }

    /// Pin a new snapshot and return its watermark.
    /// Every call must be paired with `release_snapshot`.
    pub fn begin_snapshot(&self) -> u64 {
        let mut inner = self.inner.lock();
        // Read the watermark under the lock so a concurrent publish
        // cannot slip between the read and the registration
        let watermark = self.last_committed();
        *inner.active_snapshots.entry(watermark).or_insert(0) += 1;
        watermark
    }

    /// Release a snapshot previously returned by `begin_snapshot`
    pub fn release_snapshot(&self, watermark: u64) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.active_snapshots.get_mut(&watermark) {
            *count -= 1;
            if *count == 0 {
                inner.active_snapshots.remove(&watermark);
            }
        }
    }

    /// The lowest watermark any active transaction holds; falls back to
    /// the committed watermark when none are active. Compaction must not
    /// garbage-collect versions above this.
    pub fn oldest_active_snapshot(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .active_snapshots
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.last_committed())
    }

    /// First-committer-wins validation: fail if any commit with a higher
    /// sequence number than `watermark` wrote one of `keys`.
    pub fn check_conflict<'a>(
        &self,
        watermark: u64,
        mut keys: impl Iterator<Item = &'a [u8]>,
    ) -> Result<()> {
        let inner = self.inner.lock();
        let conflicting = keys.any(|key| {
            inner
                .recent_commits
                .iter()
                .rev()
                .take_while(|c| c.last_seq > watermark)
                .any(|c| c.keys.contains(key))
        });
        if conflicting {
            return Err(BasaltError::Conflict);
        }
        Ok(())
    }

    /// Reserve `count` consecutive sequence numbers, returning the first
    pub fn allocate_seqs(&self, count: u64) -> u64 {
        self.next_seq.fetch_add(count, Ordering::SeqCst)
    }

    /// Remember a commit for future conflict checks and prune entries no
    /// active transaction can conflict with anymore
    pub fn record_commit(&self, last_seq: u64, keys: HashSet<Vec<u8>>) {
        let mut inner = self.inner.lock();

        let floor = inner
            .active_snapshots
            .keys()
            .next()
            .copied()
            .unwrap_or(last_seq);
        while inner
            .recent_commits
            .front()
            .map(|c| c.last_seq <= floor)
            .unwrap_or(false)
        {
            inner.recent_commits.pop_front();
        }

        inner.recent_commits.push_back(CommittedTxn { last_seq, keys });
    }

    /// Advance the committed watermark after the memtable apply is done
    pub fn publish(&self, last_seq: u64) {
        self.last_committed.fetch_max(last_seq, Ordering::AcqRel);
    }

    /// Pin an existing watermark behind an RAII guard. Long-lived readers
    /// (scans) hold one so compaction cannot reclaim versions they still
    /// need.
    pub fn pin_snapshot_at(self: &std::sync::Arc<Self>, watermark: u64) -> SnapshotGuard {
        let mut inner = self.inner.lock();
        *inner.active_snapshots.entry(watermark).or_insert(0) += 1;
        drop(inner);
        SnapshotGuard {
            oracle: std::sync::Arc::clone(self),
            watermark,
        }
    }
}

/// RAII registration of a snapshot watermark; released on drop
pub struct SnapshotGuard {
    oracle: std::sync::Arc<Oracle>,
    watermark: u64,
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.oracle.release_snapshot(self.watermark);
    }
}
