//! MergingIterator ordering and direction-switch tests, driven by a
//! simple vector-backed iterator.

use std::sync::Arc;

use crate::iterator::{EmptyIterator, MergingIterator, StorageIterator};
use crate::keys::BytewiseComparator;
use crate::sstable::TableError;

/// In-memory sorted iterator for exercising the merger.
struct VecIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Option<usize>,
}

impl VecIterator {
    fn new(entries: &[(&[u8], &[u8])]) -> Box<VecIterator> {
        let entries: Vec<_> = entries
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        Box::new(VecIterator { entries, pos: None })
    }
}

impl StorageIterator for VecIterator {
    fn valid(&self) -> bool {
        self.pos.is_some_and(|p| p < self.entries.len())
    }

    fn seek_to_first(&mut self) {
        self.pos = Some(0);
    }

    fn seek_to_last(&mut self) {
        self.pos = if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.len() - 1)
        };
    }

    fn seek(&mut self, target: &[u8]) {
        self.pos = Some(
            self.entries
                .partition_point(|(k, _)| k.as_slice() < target),
        );
    }

    fn next(&mut self) {
        self.pos = self.pos.map(|p| p + 1);
    }

    fn prev(&mut self) {
        self.pos = match self.pos {
            Some(0) | None => None,
            Some(p) => Some(p - 1),
        };
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.pos.unwrap()].0
    }

    fn value(&self) -> &[u8] {
        &self.entries[self.pos.unwrap()].1
    }

    fn status(&self) -> Result<(), TableError> {
        Ok(())
    }
}

fn merger(children: Vec<Box<dyn StorageIterator>>) -> MergingIterator {
    MergingIterator::new(Arc::new(BytewiseComparator), children)
}

fn drain_forward(iter: &mut MergingIterator) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    iter.seek_to_first();
    while iter.valid() {
        out.push(iter.key().to_vec());
        iter.next();
    }
    out
}

#[test]
fn merges_disjoint_children_in_order() {
    let mut iter = merger(vec![
        VecIterator::new(&[(b"a", b"1"), (b"d", b"4")]),
        VecIterator::new(&[(b"b", b"2"), (b"e", b"5")]),
        VecIterator::new(&[(b"c", b"3")]),
    ]);
    assert_eq!(
        drain_forward(&mut iter),
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]
    );
}

#[test]
fn empty_children_are_harmless() {
    let mut iter = merger(vec![
        Box::new(EmptyIterator::new()),
        VecIterator::new(&[(b"x", b"1")]),
        Box::new(EmptyIterator::new()),
    ]);
    assert_eq!(drain_forward(&mut iter), vec![b"x".to_vec()]);

    let mut all_empty = merger(vec![Box::new(EmptyIterator::new())]);
    all_empty.seek_to_first();
    assert!(!all_empty.valid());
}

#[test]
fn seek_positions_across_children() {
    let mut iter = merger(vec![
        VecIterator::new(&[(b"a", b""), (b"c", b"")]),
        VecIterator::new(&[(b"b", b""), (b"d", b"")]),
    ]);

    iter.seek(b"b");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"b");

    iter.seek(b"bb");
    assert_eq!(iter.key(), b"c");

    iter.seek(b"z");
    assert!(!iter.valid());
}

#[test]
fn reverse_scan_yields_descending_keys() {
    let mut iter = merger(vec![
        VecIterator::new(&[(b"a", b""), (b"d", b"")]),
        VecIterator::new(&[(b"b", b""), (b"c", b"")]),
    ]);

    let mut keys = Vec::new();
    iter.seek_to_last();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.prev();
    }
    assert_eq!(
        keys,
        vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]
    );
}

#[test]
fn direction_switch_mid_scan_is_consistent() {
    let mut iter = merger(vec![
        VecIterator::new(&[(b"a", b""), (b"c", b""), (b"e", b"")]),
        VecIterator::new(&[(b"b", b""), (b"d", b"")]),
    ]);

    // Forward to "c", then reverse: must see "b", then "a".
    iter.seek(b"c");
    assert_eq!(iter.key(), b"c");
    iter.prev();
    assert_eq!(iter.key(), b"b");
    iter.prev();
    assert_eq!(iter.key(), b"a");

    // And turn forward again.
    iter.next();
    assert_eq!(iter.key(), b"b");
    iter.next();
    assert_eq!(iter.key(), b"c");
}

#[test]
fn duplicate_keys_across_children_all_surface() {
    // The merger must not collapse equal keys from different children;
    // version resolution is a higher layer's concern.
    let mut iter = merger(vec![
        VecIterator::new(&[(b"k", b"newer")]),
        VecIterator::new(&[(b"k", b"older")]),
    ]);
    iter.seek_to_first();
    assert!(iter.valid());
    assert_eq!(iter.key(), b"k");
    iter.next();
    assert!(iter.valid());
    assert_eq!(iter.key(), b"k");
    iter.next();
    assert!(!iter.valid());
}
