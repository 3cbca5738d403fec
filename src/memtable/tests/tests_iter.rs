//! Memtable iteration order and positioning.

use std::sync::Arc;

use crate::iterator::StorageIterator;
use crate::keys::{
    BytewiseComparator, InternalKey, InternalKeyComparator, MAX_SEQUENCE, RecordKind,
    parse_internal_key,
};
use crate::memtable::MemTable;

fn memtable() -> Arc<MemTable> {
    Arc::new(MemTable::new(InternalKeyComparator::new(Arc::new(
        BytewiseComparator,
    ))))
}

#[test]
fn iterates_user_keys_ascending_sequences_descending() {
    let mem = memtable();
    mem.add(1, RecordKind::Value, b"b", b"b1");
    mem.add(2, RecordKind::Value, b"a", b"a2");
    mem.add(3, RecordKind::Value, b"b", b"b3");

    let mut iter = mem.iter();
    iter.seek_to_first();

    let mut seen = Vec::new();
    while iter.valid() {
        let parsed = parse_internal_key(iter.key()).unwrap();
        seen.push((
            parsed.user_key.to_vec(),
            parsed.sequence,
            iter.value().to_vec(),
        ));
        iter.next();
    }

    assert_eq!(
        seen,
        vec![
            (b"a".to_vec(), 2, b"a2".to_vec()),
            (b"b".to_vec(), 3, b"b3".to_vec()),
            (b"b".to_vec(), 1, b"b1".to_vec()),
        ]
    );
}

#[test]
fn seek_positions_at_internal_key() {
    let mem = memtable();
    mem.add(1, RecordKind::Value, b"a", b"");
    mem.add(2, RecordKind::Value, b"c", b"");

    let mut iter = mem.iter();
    // Probe at max sequence lands on the newest entry of "c".
    iter.seek(InternalKey::new(b"b", MAX_SEQUENCE, RecordKind::Value).encoded());
    assert!(iter.valid());
    assert_eq!(parse_internal_key(iter.key()).unwrap().user_key, b"c");

    iter.seek(InternalKey::new(b"z", MAX_SEQUENCE, RecordKind::Value).encoded());
    assert!(!iter.valid());
}

#[test]
fn reverse_iteration_mirrors_forward() {
    let mem = memtable();
    for (seq, key) in [(1u64, b"a"), (2, b"b"), (3, b"c")] {
        mem.add(seq, RecordKind::Value, key, b"v");
    }

    let mut forward = Vec::new();
    let mut iter = mem.iter();
    iter.seek_to_first();
    while iter.valid() {
        forward.push(iter.key().to_vec());
        iter.next();
    }

    let mut backward = Vec::new();
    iter.seek_to_last();
    while iter.valid() {
        backward.push(iter.key().to_vec());
        iter.prev();
    }
    backward.reverse();

    assert_eq!(forward, backward);
    assert_eq!(forward.len(), 3);
}

#[test]
fn iterator_keeps_table_alive() {
    let mem = memtable();
    mem.add(1, RecordKind::Value, b"k", b"v");

    let mut iter = mem.iter();
    drop(mem); // iterator still holds an Arc
    iter.seek_to_first();
    assert!(iter.valid());
    assert_eq!(iter.value(), b"v");
}
