//! Tests for the storage layer
//!
//! These tests verify:
//! - Segment build/read round trips and snapshot version resolution
//! - Block checksum validation
//! - Leveled compaction through the engine: trigger, tombstone
//!   reclamation, and read correctness across level moves

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};

use basalt::config::{Config, WalSyncStrategy};
use basalt::engine::Engine;
use basalt::error::BasaltError;
use basalt::memtable::MemTableEntry;
use basalt::storage::sstable::segment_path;
use basalt::storage::{Manifest, ManifestRecord, SegmentBuilder, SegmentReader};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn build_segment(
    dir: &TempDir,
    id: u64,
    block_size: usize,
    records: &[(&[u8], u64, Option<&[u8]>)],
) -> std::path::PathBuf {
    let path = segment_path(dir.path(), id);
    let mut builder = SegmentBuilder::new(&path, id, block_size).unwrap();
    for (key, seq, value) in records {
        builder.add(key, *seq, *value).unwrap();
    }
    builder.finish().unwrap();
    path
}

/// Engine tuned so every flush lands a small level-0 segment and two of
/// them trigger a compaction, all in the foreground
fn setup_compacting_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .memtable_size_limit(64 * 1024)
        .block_size(256)
        .l0_compaction_trigger(2)
        .background_compaction(false)
        .build();
    let engine = Engine::open(config).unwrap();
    (temp_dir, engine)
}

fn corrupt_byte(path: &std::path::Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
}

// =============================================================================
// Segment Build/Read Tests
// =============================================================================

#[test]
fn test_segment_build_and_read() {
    let temp = TempDir::new().unwrap();
    let path = build_segment(
        &temp,
        1,
        4096,
        &[
            (b"apple", 3, Some(b"red")),
            (b"banana", 1, Some(b"yellow")),
            (b"cherry", 2, None),
        ],
    );

    let reader = SegmentReader::open(&path).unwrap();
    assert_eq!(reader.entry_count(), 3);
    assert_eq!(reader.min_key(), b"apple");
    assert_eq!(reader.max_key(), b"cherry");
    assert_eq!(reader.max_seq(), 3);

    assert_eq!(
        reader.get(b"apple", u64::MAX).unwrap(),
        Some((3, MemTableEntry::Value(b"red".to_vec())))
    );
    assert_eq!(
        reader.get(b"banana", u64::MAX).unwrap(),
        Some((1, MemTableEntry::Value(b"yellow".to_vec())))
    );
    assert_eq!(
        reader.get(b"cherry", u64::MAX).unwrap(),
        Some((2, MemTableEntry::Tombstone))
    );
    assert_eq!(reader.get(b"durian", u64::MAX).unwrap(), None);
}

#[test]
fn test_segment_snapshot_version_resolution() {
    let temp = TempDir::new().unwrap();
    // Three versions of one key, newest first
    let path = build_segment(
        &temp,
        1,
        4096,
        &[
            (b"key", 9, Some(b"v9")),
            (b"key", 5, Some(b"v5")),
            (b"key", 2, Some(b"v2")),
        ],
    );

    let reader = SegmentReader::open(&path).unwrap();
    assert_eq!(
        reader.get(b"key", 10).unwrap(),
        Some((9, MemTableEntry::Value(b"v9".to_vec())))
    );
    assert_eq!(
        reader.get(b"key", 8).unwrap(),
        Some((5, MemTableEntry::Value(b"v5".to_vec())))
    );
    assert_eq!(
        reader.get(b"key", 2).unwrap(),
        Some((2, MemTableEntry::Value(b"v2".to_vec())))
    );
    // No version existed at snapshot 1
    assert_eq!(reader.get(b"key", 1).unwrap(), None);
}

#[test]
fn test_segment_rejects_out_of_order_records() {
    let temp = TempDir::new().unwrap();
    let path = segment_path(temp.path(), 1);
    let mut builder = SegmentBuilder::new(&path, 1, 4096).unwrap();

    builder.add(b"banana", 1, Some(b"v")).unwrap();
    assert!(matches!(
        builder.add(b"apple", 2, Some(b"v")),
        Err(BasaltError::Storage(_))
    ));
    // Same key must arrive seq-descending
    assert!(builder.add(b"banana", 2, Some(b"v")).is_err());
}

#[test]
fn test_segment_rejects_empty_finish() {
    let temp = TempDir::new().unwrap();
    let path = segment_path(temp.path(), 1);
    let builder = SegmentBuilder::new(&path, 1, 4096).unwrap();
    assert!(matches!(builder.finish(), Err(BasaltError::Storage(_))));
}

#[test]
fn test_segment_multi_block_lookup_and_iteration() {
    let temp = TempDir::new().unwrap();

    // Tiny blocks force many of them
    let records: Vec<(Vec<u8>, u64, Vec<u8>)> = (0..200)
        .map(|i| {
            (
                format!("key{:04}", i).into_bytes(),
                200 - i as u64,
                format!("value{:04}", i).into_bytes(),
            )
        })
        .collect();
    let borrowed: Vec<(&[u8], u64, Option<&[u8]>)> = records
        .iter()
        .map(|(k, s, v)| (k.as_slice(), *s, Some(v.as_slice())))
        .collect();
    let path = build_segment(&temp, 1, 64, &borrowed);

    let reader = SegmentReader::open(&path).unwrap();
    for (key, seq, value) in &records {
        assert_eq!(
            reader.get(key, u64::MAX).unwrap(),
            Some((*seq, MemTableEntry::Value(value.clone()))),
            "lookup failed for {:?}",
            String::from_utf8_lossy(key)
        );
    }

    // Full iteration yields every record in order
    let all: Vec<_> = reader
        .iter()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(all.len(), 200);
    for (i, (key, _, _)) in all.iter().enumerate() {
        assert_eq!(key, format!("key{:04}", i).as_bytes());
    }

    // iter_from starts at the containing block but never skips the key
    let from: Vec<_> = reader
        .iter_from(b"key0150")
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert!(from.iter().any(|(k, _, _)| k == b"key0150"));
}

#[test]
fn test_segment_detects_block_corruption() {
    let temp = TempDir::new().unwrap();
    let path = build_segment(&temp, 1, 4096, &[(b"key", 1, Some(b"value"))]);

    // Flip a byte inside the data block (past the 6-byte header)
    corrupt_byte(&path, 10);

    let reader = SegmentReader::open(&path).unwrap();
    assert!(matches!(
        reader.get(b"key", u64::MAX),
        Err(BasaltError::Corruption(_))
    ));
}

#[test]
fn test_segment_detects_index_corruption() {
    let temp = TempDir::new().unwrap();
    let path = build_segment(&temp, 1, 4096, &[(b"key", 1, Some(b"value"))]);

    // Flip a byte in the index region, just before the 16-byte trailer
    let len = std::fs::metadata(&path).unwrap().len();
    corrupt_byte(&path, len - 17);

    assert!(matches!(
        SegmentReader::open(&path),
        Err(BasaltError::Corruption(_))
    ));
}

#[test]
fn test_segment_rejects_bad_magic() {
    let temp = TempDir::new().unwrap();
    let path = build_segment(&temp, 1, 4096, &[(b"key", 1, Some(b"value"))]);

    corrupt_byte(&path, 0);

    assert!(matches!(
        SegmentReader::open(&path),
        Err(BasaltError::Corruption(_))
    ));
}

// =============================================================================
// Compaction Tests (through the engine)
// =============================================================================

#[test]
fn test_compaction_moves_l0_into_l1() {
    let (_temp, engine) = setup_compacting_engine();

    for i in 0..20 {
        engine
            .put(format!("key{:02}", i).as_bytes(), b"value")
            .unwrap();
    }
    engine.flush().unwrap(); // first L0 segment, below the trigger
    assert_eq!(engine.level_segment_count(0), 1);

    for i in 20..40 {
        engine
            .put(format!("key{:02}", i).as_bytes(), b"value")
            .unwrap();
    }
    engine.flush().unwrap(); // second L0 segment trips the trigger

    assert_eq!(engine.level_segment_count(0), 0);
    assert!(engine.level_segment_count(1) >= 1);

    // Every key survives the level move
    for i in 0..40 {
        let key = format!("key{:02}", i);
        assert_eq!(
            engine.get(key.as_bytes()).unwrap(),
            Some(b"value".to_vec()),
            "key {} lost in compaction",
            key
        );
    }
}

#[test]
fn test_compaction_keeps_newest_version() {
    let (_temp, engine) = setup_compacting_engine();

    engine.put(b"key", b"old").unwrap();
    engine.flush().unwrap();

    engine.put(b"key", b"new").unwrap();
    engine.flush().unwrap(); // triggers compaction of both segments

    assert_eq!(engine.level_segment_count(0), 0);
    assert_eq!(engine.get(b"key").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn test_compaction_reclaims_tombstones() {
    let (_temp, engine) = setup_compacting_engine();

    for i in 0..10 {
        engine.put(format!("key{}", i).as_bytes(), b"value").unwrap();
    }
    engine.flush().unwrap();

    for i in 0..10 {
        engine.delete(format!("key{}", i).as_bytes()).unwrap();
    }
    engine.flush().unwrap();

    // The merge writes the bottom of the range: tombstones and the
    // values they shadow both retire, leaving nothing on disk
    assert_eq!(engine.segment_count(), 0);

    for i in 0..10 {
        assert_eq!(engine.get(format!("key{}", i).as_bytes()).unwrap(), None);
    }
}

#[test]
fn test_compaction_retains_versions_for_active_snapshot() {
    let (_temp, engine) = setup_compacting_engine();

    engine.put(b"key", b"old").unwrap();
    engine.flush().unwrap();

    // The transaction's snapshot pins the old version
    let txn = engine.begin_txn(true);

    engine.put(b"key", b"new").unwrap();
    engine.flush().unwrap(); // compaction runs with the snapshot active

    assert_eq!(txn.get(b"key").unwrap(), Some(b"old".to_vec()));
    assert_eq!(engine.get(b"key").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn test_concurrent_commits_retire_compaction_inputs_once() {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 64 })
        .memtable_size_limit(512)
        .l0_compaction_trigger(1)
        .background_compaction(false)
        .build();
    let engine = Arc::new(Engine::open(config).unwrap());

    // Aggressive rotation and trigger settings make every committing
    // thread flush and compact inline, racing the others
    let mut handles = vec![];
    for t in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..200 {
                let key = format!("t{}k{:04}", t, i);
                engine
                    .put(key.as_bytes(), b"value_padding_for_rotation")
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    drop(engine);

    // Replay the manifest: a compaction may only retire segments that
    // are live at that point in the history, and only once
    let (_, records) = Manifest::open(&temp_dir.path().join("MANIFEST")).unwrap();
    let mut live: HashSet<(u32, u64)> = HashSet::new();
    for record in records {
        match record {
            ManifestRecord::Flush { level, meta, .. } => {
                assert!(live.insert((level, meta.id)));
            }
            ManifestRecord::Compaction {
                deleted,
                added_level,
                added,
            } => {
                for target in deleted {
                    assert!(
                        live.remove(&target),
                        "compaction retired segment {:?} that was not live",
                        target
                    );
                }
                for meta in added {
                    assert!(live.insert((added_level, meta.id)));
                }
            }
        }
    }

    // The data itself came through the churn intact
    let engine = Engine::open_path(temp_dir.path()).unwrap();
    for t in 0..8 {
        for i in [0, 199] {
            let key = format!("t{}k{:04}", t, i);
            assert_eq!(
                engine.get(key.as_bytes()).unwrap(),
                Some(b"value_padding_for_rotation".to_vec()),
                "key {} lost",
                key
            );
        }
    }
}

#[test]
fn test_compaction_unlinks_input_files() {
    let (temp, engine) = setup_compacting_engine();

    for i in 0..20 {
        engine.put(format!("key{:02}", i).as_bytes(), b"v").unwrap();
    }
    engine.flush().unwrap();
    for i in 20..40 {
        engine.put(format!("key{:02}", i).as_bytes(), b"v").unwrap();
    }
    engine.flush().unwrap();

    // Only the compaction outputs remain in the segment directory
    let files: Vec<_> = std::fs::read_dir(temp.path().join("sstables"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), engine.segment_count());
}
