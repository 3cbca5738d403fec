//! Atomic batches and the write group protocol.

use tempfile::TempDir;

use crate::batch::WriteBatch;
use crate::engine::tests::helpers::*;

#[test]
fn batch_applies_all_operations() {
    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), memtable_only_config());

    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.put(b"b", b"2");
    batch.delete(b"a");
    batch.put(b"c", b"3");
    engine.write(&wopts(), batch).unwrap();

    assert_eq!(engine.get(&ropts(), b"a").unwrap(), None);
    assert_eq!(engine.get(&ropts(), b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.get(&ropts(), b"c").unwrap(), Some(b"3".to_vec()));
    engine.close().unwrap();
}

#[test]
fn batch_operations_apply_in_order() {
    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), memtable_only_config());

    let mut batch = WriteBatch::new();
    batch.put(b"k", b"first");
    batch.put(b"k", b"second");
    engine.write(&wopts(), batch).unwrap();
    assert_eq!(engine.get(&ropts(), b"k").unwrap(), Some(b"second".to_vec()));
    engine.close().unwrap();
}

#[test]
fn empty_batch_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), memtable_only_config());
    engine.write(&wopts(), WriteBatch::new()).unwrap();
    assert!(collect(&engine).is_empty());
    engine.close().unwrap();
}

#[test]
fn snapshot_never_sees_half_a_batch() {
    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), memtable_only_config());

    let before = engine.snapshot();
    let mut batch = WriteBatch::new();
    batch.put(b"x", b"1");
    batch.put(b"y", b"2");
    engine.write(&wopts(), batch).unwrap();
    let after = engine.snapshot();

    let at = |snap: &crate::snapshot::Snapshot, key: &[u8]| {
        let opts = crate::options::ReadOptions {
            snapshot: Some(snap.clone()),
            ..ropts()
        };
        engine.get(&opts, key).unwrap()
    };

    assert_eq!(at(&before, b"x"), None);
    assert_eq!(at(&before, b"y"), None);
    assert_eq!(at(&after, b"x"), Some(b"1".to_vec()));
    assert_eq!(at(&after, b"y"), Some(b"2".to_vec()));

    engine.release_snapshot(before);
    engine.release_snapshot(after);
    engine.close().unwrap();
}

#[test]
fn interleaved_batches_from_many_threads_stay_atomic() {
    use std::thread;

    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), memtable_only_config());

    // Each thread repeatedly writes (left, right) pairs that must always
    // agree; the writer-group coalescing must never tear a batch.
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let engine = engine.clone();
            thread::spawn(move || {
                for round in 0..200u32 {
                    let tag = format!("{t}-{round}").into_bytes();
                    let mut batch = crate::batch::WriteBatch::new();
                    batch.put(format!("pair_{t}_left").as_bytes(), &tag);
                    batch.put(format!("pair_{t}_right").as_bytes(), &tag);
                    engine.write(&wopts(), batch).unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    for t in 0..4 {
        let left = engine
            .get(&ropts(), format!("pair_{t}_left").as_bytes())
            .unwrap();
        let right = engine
            .get(&ropts(), format!("pair_{t}_right").as_bytes())
            .unwrap();
        assert_eq!(left, right, "pair {t} torn");
        assert!(left.is_some());
    }
    engine.close().unwrap();
}
