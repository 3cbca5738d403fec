//! Whole-table build → open → scan/get roundtrips.

use tempfile::TempDir;

use crate::iterator::StorageIterator;
use crate::options::{CompressionType, ReadOptions};
use crate::sstable::tests::helpers::*;

#[test]
fn build_then_full_scan_returns_every_entry() {
    for compression in [CompressionType::None, CompressionType::Snappy] {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.ldb");
        let entries = corpus(500);
        build_table(&path, &small_block_config(compression), &entries);

        let table = open_table(&path, None);
        let mut iter = table.iter(&ReadOptions::new());
        iter.seek_to_first();
        for (key, value) in &entries {
            assert!(iter.valid(), "{compression:?}");
            assert_eq!(iter.key(), key.as_slice());
            assert_eq!(iter.value(), value.as_slice());
            iter.next();
        }
        assert!(!iter.valid());
        iter.status().unwrap();
    }
}

#[test]
fn internal_get_lands_on_first_key_at_or_after_target() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("t.ldb");
    let entries = corpus(200);
    build_table(
        &path,
        &small_block_config(CompressionType::None),
        &entries,
    );

    let table = open_table(&path, None);
    let opts = ReadOptions::new();

    // Exact hits.
    for (key, value) in entries.iter().step_by(17) {
        let (found_key, found_value) = table.internal_get(&opts, key).unwrap().unwrap();
        assert_eq!(&found_key, key);
        assert_eq!(&found_value, value);
    }

    // Between keys: lands on the successor.
    let (found_key, _) = table
        .internal_get(&opts, b"key000010a")
        .unwrap()
        .unwrap();
    assert_eq!(found_key, b"key000011");

    // Past the end.
    assert!(table.internal_get(&opts, b"zzz").unwrap().is_none());
}

#[test]
fn seek_and_reverse_scan_across_blocks() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("t.ldb");
    let entries = corpus(300);
    build_table(
        &path,
        &small_block_config(CompressionType::None),
        &entries,
    );

    let table = open_table(&path, None);
    let mut iter = table.iter(&ReadOptions::new());

    iter.seek(b"key000150");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"key000150");

    // Walk backward over a block boundary.
    let mut keys = Vec::new();
    for _ in 0..20 {
        keys.push(iter.key().to_vec());
        iter.prev();
        assert!(iter.valid());
    }
    for window in keys.windows(2) {
        assert!(window[1] < window[0]);
    }

    iter.seek_to_last();
    assert_eq!(iter.key(), entries.last().unwrap().0.as_slice());
}

#[test]
fn block_cache_serves_repeat_reads() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("t.ldb");
    let entries = corpus(300);
    build_table(
        &path,
        &small_block_config(CompressionType::None),
        &entries,
    );

    let cache = block_cache(1 << 20);
    let table = open_table(&path, Some(cache.clone()));
    let opts = ReadOptions::new();

    for (key, value) in entries.iter().step_by(25) {
        let (_, found) = table.internal_get(&opts, key).unwrap().unwrap();
        assert_eq!(&found, value);
    }
    let charged = cache.total_charge();
    assert!(charged > 0, "blocks should have been cached");

    // Second pass hits the cache; charge stays put.
    for (key, _) in entries.iter().step_by(25) {
        table.internal_get(&opts, key).unwrap().unwrap();
    }
    assert_eq!(cache.total_charge(), charged);
}

#[test]
fn fill_cache_false_bypasses_the_cache() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("t.ldb");
    build_table(
        &path,
        &small_block_config(CompressionType::None),
        &corpus(100),
    );

    let cache = block_cache(1 << 20);
    let table = open_table(&path, Some(cache.clone()));
    let opts = ReadOptions {
        fill_cache: false,
        ..ReadOptions::new()
    };
    table.internal_get(&opts, b"key000050").unwrap().unwrap();
    assert_eq!(cache.total_charge(), 0);
}

#[test]
fn approximate_offsets_are_monotonic() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("t.ldb");
    let entries = corpus(400);
    build_table(
        &path,
        &small_block_config(CompressionType::None),
        &entries,
    );

    let table = open_table(&path, None);
    let mut last = 0;
    for (key, _) in entries.iter().step_by(40) {
        let offset = table.approximate_offset_of(key);
        assert!(offset >= last, "offsets must not decrease");
        last = offset;
    }
    // A key past the end maps near the end of the data region.
    assert!(table.approximate_offset_of(b"zzz") >= last);
}

#[test]
fn single_entry_and_empty_value_tables() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("t.ldb");
    let entries = vec![(b"only-key".to_vec(), Vec::new())];
    build_table(
        &path,
        &small_block_config(CompressionType::None),
        &entries,
    );

    let table = open_table(&path, None);
    let mut iter = table.iter(&ReadOptions::new());
    iter.seek_to_first();
    assert!(iter.valid());
    assert_eq!(iter.key(), b"only-key");
    assert_eq!(iter.value(), b"");
    iter.next();
    assert!(!iter.valid());
}
