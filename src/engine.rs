//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Coordinate WAL, memtables, segment storage, and the commit oracle
//! - Run crash recovery on startup
//! - Rotate and flush memtables, schedule compactions
//! - Expose the transactional public API

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::ops::{Bound, RangeBounds};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::memtable::{MemTable, MemTableEntry};
use crate::scan::{RecordSource, Scan};
use crate::storage::StorageManager;
use crate::txn::{Oracle, Transaction};
use crate::wal::{self, Operation, WalEntry, WalRecovery, WalWriter};

/// Work items for the background worker
enum Job {
    /// Flush frozen memtables, then check compaction triggers
    Flush,
    /// Check compaction triggers only
    Compact,
    Shutdown,
}

/// The active memtable plus frozen predecessors awaiting flush
struct TableSet {
    active: Arc<MemTable>,
    /// Oldest first; readers walk them newest → oldest
    frozen: Vec<Arc<MemTable>>,
}

/// The main storage engine.
///
/// ## Concurrency Model
///
/// - **Commits**: serialized by `commit_lock`. Under it: conflict check →
///   sequence assignment → WAL append → memtable apply → watermark
///   publish → rotation check. Nothing else writes shared state.
/// - **Reads**: never take the commit lock. They pin a snapshot, grab the
///   table set under a brief read lock, and resolve against immutable
///   structures from there.
/// - **Flush/compaction**: background worker; it only takes the levels or
///   table-set write lock for the metadata swap, never across file I/O.
pub struct Engine {
    inner: Arc<EngineInner>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    tx: Sender<Job>,
    handle: JoinHandle<()>,
}

struct EngineInner {
    config: Config,
    oracle: Arc<Oracle>,
    tables: RwLock<TableSet>,
    /// WAL of the active memtable generation
    wal: Mutex<WalWriter>,
    storage: StorageManager,
    /// Serializes commits (and with them, rotations)
    commit_lock: Mutex<()>,
    /// Serializes flushers (worker and foreground `flush()` calls)
    flush_lock: Mutex<()>,
    /// Serializes compaction passes; without a background worker,
    /// several committing threads can otherwise plan the same inputs
    compaction_lock: Mutex<()>,
    next_generation: AtomicU64,
    wal_dir: std::path::PathBuf,
}

impl Engine {
    const WAL_DIR: &'static str = "wal";

    /// Open or create an engine with the given config.
    ///
    /// On startup:
    /// 1. Open the manifest and segment tree
    /// 2. Replay surviving WAL files (truncating corrupt tails) and flush
    ///    the recovered records to level 0 so they are durable in one place
    /// 3. Start a fresh memtable generation and the background worker
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let wal_dir = config.data_dir.join(Self::WAL_DIR);
        fs::create_dir_all(&wal_dir)?;

        let (storage, segment_last_seq) = StorageManager::open(&config)?;

        // Replay WALs left behind by a crash or an unflushed close
        let generations = wal::list_wal_generations(&wal_dir)?;
        let mut wal_last_seq = 0u64;
        let max_generation = generations.last().copied().unwrap_or(0);

        if !generations.is_empty() {
            let recovered = MemTable::new(max_generation);
            let mut entries_total = 0u64;
            for generation in &generations {
                let path = wal::wal_path(&wal_dir, *generation);
                let (entries, stats) = WalRecovery::recover(&path)?;
                entries_total += stats.entries_recovered;
                wal_last_seq = wal_last_seq.max(stats.last_seq);
                for entry in entries {
                    apply_entry(&recovered, &entry);
                }
            }

            if !recovered.is_empty() {
                info!(
                    entries = entries_total,
                    last_seq = wal_last_seq,
                    "flushing recovered WAL records to level 0"
                );
                storage.flush_memtable(&recovered)?;
            }

            // Recovered data is durable in a segment; the logs can go
            for generation in &generations {
                fs::remove_file(wal::wal_path(&wal_dir, *generation))?;
            }
        }

        let last_seq = segment_last_seq.max(wal_last_seq);
        let oracle = Arc::new(Oracle::new(last_seq));

        let generation = max_generation + 1;
        let active = Arc::new(MemTable::new(generation));
        let wal_writer = WalWriter::open(
            &wal::wal_path(&wal_dir, generation),
            config.wal_sync_strategy,
        )?;

        let background = config.background_compaction;
        let inner = Arc::new(EngineInner {
            config,
            oracle,
            tables: RwLock::new(TableSet {
                active,
                frozen: Vec::new(),
            }),
            wal: Mutex::new(wal_writer),
            storage,
            commit_lock: Mutex::new(()),
            flush_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            next_generation: AtomicU64::new(generation + 1),
            wal_dir,
        });

        let worker = if background {
            let (tx, rx) = unbounded();
            let worker_inner = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name("basalt-worker".to_string())
                .spawn(move || worker_loop(worker_inner, rx))?;
            Some(Worker { tx, handle })
        } else {
            None
        };

        Ok(Self {
            inner,
            worker: Mutex::new(worker),
        })
    }

    /// Open with a path (convenience method): default config with the
    /// specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begin a transaction pinned to the current committed watermark
    pub fn begin_txn(&self, read_only: bool) -> Transaction<'_> {
        let watermark = self.inner.oracle.begin_snapshot();
        Transaction::new(self, watermark, read_only)
    }

    // =========================================================================
    // One-shot conveniences
    // =========================================================================

    /// Get a value at the current committed watermark
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let watermark = self.inner.oracle.begin_snapshot();
        let result = self.read_at(key, watermark);
        self.inner.oracle.release_snapshot(watermark);
        result
    }

    /// Put a single key-value pair in its own transaction.
    /// A blind single-key write cannot conflict, so it never fails
    /// with `Conflict`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut write_set = BTreeMap::new();
        write_set.insert(key.to_vec(), Some(value.to_vec()));
        self.commit_batch(None, write_set)?;
        Ok(())
    }

    /// Delete a single key in its own transaction
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut write_set = BTreeMap::new();
        write_set.insert(key.to_vec(), None);
        self.commit_batch(None, write_set)?;
        Ok(())
    }

    /// Ordered scan of live records at the current committed watermark
    pub fn scan(&self, range: impl RangeBounds<Vec<u8>>) -> Result<Scan> {
        let lower = clone_bound(range.start_bound());
        let upper = clone_bound(range.end_bound());
        let watermark = self.inner.oracle.begin_snapshot();
        // scan_at registers its own pin; this one only covered the gap
        let scan = self.scan_at(lower, upper, watermark, None);
        self.inner.oracle.release_snapshot(watermark);
        scan
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Rotate the active memtable and flush every frozen table to level 0,
    /// in the foreground
    pub fn flush(&self) -> Result<()> {
        {
            let _guard = self.inner.commit_lock.lock();
            self.inner.rotate_active(false)?;
        }
        self.inner.flush_frozen()?;
        self.schedule(Job::Compact)?;
        Ok(())
    }

    /// Close the engine gracefully: stop the worker, flush outstanding
    /// memtables, and sync the WAL
    pub fn close(self) -> Result<()> {
        self.stop_worker();

        {
            let _guard = self.inner.commit_lock.lock();
            self.inner.rotate_active(false)?;
        }
        self.inner.flush_frozen()?;
        self.inner.wal.lock().sync()?;
        Ok(())
    }

    fn stop_worker(&self) {
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.tx.send(Job::Shutdown);
            if worker.handle.join().is_err() {
                error!("background worker panicked");
            }
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Approximate size of the active memtable
    pub fn memtable_size(&self) -> usize {
        self.inner.tables.read().active.size()
    }

    /// Number of frozen memtables awaiting flush
    pub fn frozen_table_count(&self) -> usize {
        self.inner.tables.read().frozen.len()
    }

    /// Total number of live segments
    pub fn segment_count(&self) -> usize {
        self.inner.storage.table_count()
    }

    /// Number of segments at one level
    pub fn level_segment_count(&self, level: usize) -> usize {
        self.inner.storage.level_table_count(level)
    }

    /// Highest committed sequence number
    pub fn last_committed_seq(&self) -> u64 {
        self.inner.oracle.last_committed()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // =========================================================================
    // Internals shared with Transaction
    // =========================================================================

    pub(crate) fn oracle(&self) -> &Oracle {
        &self.inner.oracle
    }

    /// Snapshot point lookup: active table, frozen tables newest → oldest,
    /// then the segment tree
    pub(crate) fn read_at(&self, key: &[u8], snapshot: u64) -> Result<Option<Vec<u8>>> {
        let (active, frozen) = {
            let tables = self.inner.tables.read();
            (tables.active.clone(), tables.frozen.clone())
        };

        let mut newest: Option<(u64, MemTableEntry)> = None;
        if let Some(found) = active.get(key, snapshot) {
            newest = Some(found);
        }
        if newest.is_none() {
            for table in frozen.iter().rev() {
                if let Some(found) = table.get(key, snapshot) {
                    newest = Some(found);
                    break;
                }
            }
        }
        if newest.is_none() {
            newest = self.inner.storage.get(key, snapshot)?;
        }

        Ok(match newest {
            Some((_, MemTableEntry::Value(v))) => Some(v),
            Some((_, MemTableEntry::Tombstone)) | None => None,
        })
    }

    /// Build a merged scan over overlay, memtables, and segments.
    /// The scan pins its own snapshot so compaction cannot reclaim
    /// versions out from under a long-lived iterator.
    pub(crate) fn scan_at(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        snapshot: u64,
        overlay: Option<Vec<(Vec<u8>, Option<Vec<u8>>)>>,
    ) -> Result<Scan> {
        let guard = self.inner.oracle.pin_snapshot_at(snapshot);

        let mut sources: Vec<RecordSource> = Vec::new();

        // Rank 0: the transaction's own pending writes, tagged with the
        // snapshot seq so they win against every committed version
        if let Some(overlay) = overlay {
            let records = overlay
                .into_iter()
                .map(move |(k, v)| Ok((k, snapshot, v)));
            sources.push(Box::new(records));
        }

        let (active, frozen) = {
            let tables = self.inner.tables.read();
            (tables.active.clone(), tables.frozen.clone())
        };

        let lower_ref = bound_as_ref(&lower);
        let upper_ref = bound_as_ref(&upper);

        let active_records = active.scan(lower_ref, upper_ref, snapshot);
        sources.push(Box::new(
            active_records
                .into_iter()
                .map(|(k, seq, e)| Ok((k, seq, e.into_value()))),
        ));
        for table in frozen.iter().rev() {
            let records = table.scan(lower_ref, upper_ref, snapshot);
            sources.push(Box::new(
                records
                    .into_iter()
                    .map(|(k, seq, e)| Ok((k, seq, e.into_value()))),
            ));
        }

        let min = match &lower {
            Bound::Included(k) | Bound::Excluded(k) => Some(k.as_slice()),
            Bound::Unbounded => None,
        };
        let max = match &upper {
            Bound::Included(k) | Bound::Excluded(k) => Some(k.as_slice()),
            Bound::Unbounded => None,
        };
        for iter in self.inner.storage.scan_iterators(min, max)? {
            sources.push(Box::new(iter));
        }

        Scan::new(sources, snapshot, lower, upper, guard)
    }

    /// Commit a transaction's write-set: validate against the watermark,
    /// sequence, log, apply, publish
    pub(crate) fn commit_write_set(
        &self,
        watermark: u64,
        write_set: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    ) -> Result<u64> {
        self.commit_batch(Some(watermark), write_set)
    }

    fn commit_batch(
        &self,
        watermark: Option<u64>,
        write_set: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    ) -> Result<u64> {
        debug_assert!(!write_set.is_empty());
        let inner = &self.inner;

        let guard = inner.commit_lock.lock();

        if let Some(watermark) = watermark {
            inner
                .oracle
                .check_conflict(watermark, write_set.keys().map(|k| k.as_slice()))?;
        }

        let count = write_set.len() as u64;
        let first_seq = inner.oracle.allocate_seqs(count);
        let last_seq = first_seq + count - 1;

        let keys: HashSet<Vec<u8>> = write_set.keys().cloned().collect();
        let operations: Vec<Operation> = write_set
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => Operation::Put { key, value },
                None => Operation::Delete { key },
            })
            .collect();
        let entry = WalEntry::new(first_seq, operations);

        // WAL first: a record is never applied before it is logged
        inner.wal.lock().append(&entry)?;

        let active = inner.tables.read().active.clone();
        apply_entry(&active, &entry);

        inner.oracle.record_commit(last_seq, keys);
        inner.oracle.publish(last_seq);

        // Rotation happens under the commit lock so the WAL generation
        // and the active table always swap together
        let rotated = inner.rotate_active(true)?;
        drop(guard);

        if rotated {
            self.schedule(Job::Flush)?;
        }

        Ok(last_seq)
    }

    /// Hand a job to the worker, or run it inline when background work
    /// is disabled
    fn schedule(&self, job: Job) -> Result<()> {
        let tx = self.worker.lock().as_ref().map(|w| w.tx.clone());
        match tx {
            Some(tx) => {
                // A send can only fail after shutdown; close() flushes anyway
                let _ = tx.send(job);
            }
            None => match job {
                Job::Flush => {
                    self.inner.flush_frozen()?;
                    self.inner.run_compactions();
                }
                Job::Compact => self.inner.run_compactions(),
                Job::Shutdown => {}
            },
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Close() already stopped it; otherwise stop the thread without
        // flushing — the WAL makes the memtable contents recoverable
        self.stop_worker();
    }
}

impl EngineInner {
    /// Swap in a fresh memtable + WAL generation. With `only_if_full`,
    /// rotates only past the size threshold; otherwise rotates any
    /// non-empty table. Returns whether a rotation happened.
    /// Caller must hold the commit lock.
    fn rotate_active(&self, only_if_full: bool) -> Result<bool> {
        {
            let tables = self.tables.read();
            if tables.active.is_empty() {
                return Ok(false);
            }
            if only_if_full && tables.active.size() < self.config.memtable_size_limit {
                return Ok(false);
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let new_wal = WalWriter::open(
            &wal::wal_path(&self.wal_dir, generation),
            self.config.wal_sync_strategy,
        )?;

        {
            let mut wal = self.wal.lock();
            wal.sync()?;
            *wal = new_wal;
        }

        let mut tables = self.tables.write();
        let old = std::mem::replace(&mut tables.active, Arc::new(MemTable::new(generation)));
        old.freeze();
        tables.frozen.push(old);
        Ok(true)
    }

    /// Flush every frozen memtable, oldest first, retiring each table's
    /// WAL generation once its segment is in the manifest
    fn flush_frozen(&self) -> Result<()> {
        let _guard = self.flush_lock.lock();

        loop {
            let table = match self.tables.read().frozen.first() {
                Some(table) => table.clone(),
                None => return Ok(()),
            };

            if table.is_empty() {
                self.retire_frozen(&table)?;
                continue;
            }

            self.storage.flush_memtable(&table)?;
            self.retire_frozen(&table)?;
        }
    }

    /// Drop a flushed table from the frozen list and delete its WAL
    fn retire_frozen(&self, table: &Arc<MemTable>) -> Result<()> {
        {
            let mut tables = self.tables.write();
            tables
                .frozen
                .retain(|t| t.wal_generation() != table.wal_generation());
        }
        let path = wal::wal_path(&self.wal_dir, table.wal_generation());
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Run compactions until every level is within budget. Failures are
    /// retried with backoff a few times, then left for the next trigger —
    /// inputs are never touched until outputs are durable, so a failed
    /// attempt costs nothing but time.
    fn run_compactions(&self) {
        // One pass at a time: a plan built from a stale level set would
        // retire segments a concurrent pass already removed
        let _guard = self.compaction_lock.lock();

        let mut attempts = 0u32;
        loop {
            let oldest = self.oracle.oldest_active_snapshot();
            match self.storage.compact_once(oldest) {
                Ok(true) => {
                    attempts = 0;
                }
                Ok(false) => break,
                Err(e) => {
                    attempts += 1;
                    if attempts > 3 {
                        error!(error = %e, "compaction failed repeatedly, deferring");
                        break;
                    }
                    warn!(error = %e, attempt = attempts, "compaction failed, retrying");
                    std::thread::sleep(std::time::Duration::from_millis(
                        50 * u64::from(attempts),
                    ));
                }
            }
        }
    }
}

/// Apply a WAL entry's operations to a memtable, assigning each record
/// its position in the entry's sequence range
fn apply_entry(table: &MemTable, entry: &WalEntry) {
    for (i, op) in entry.operations.iter().enumerate() {
        let seq = entry.first_seq + i as u64;
        match op {
            Operation::Put { key, value } => {
                table.put(key.clone(), seq, MemTableEntry::Value(value.clone()))
            }
            Operation::Delete { key } => table.put(key.clone(), seq, MemTableEntry::Tombstone),
        }
    }
}

fn worker_loop(inner: Arc<EngineInner>, rx: Receiver<Job>) {
    info!("background worker started");
    for job in rx.iter() {
        match job {
            Job::Flush => {
                if let Err(e) = inner.flush_frozen() {
                    error!(error = %e, "memtable flush failed");
                }
                inner.run_compactions();
            }
            Job::Compact => inner.run_compactions(),
            Job::Shutdown => break,
        }
    }
    info!("background worker stopped");
}

fn clone_bound(bound: Bound<&Vec<u8>>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(k) => Bound::Included(k.clone()),
        Bound::Excluded(k) => Bound::Excluded(k.clone()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn bound_as_ref(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
