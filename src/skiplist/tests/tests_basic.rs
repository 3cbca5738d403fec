//! Single-threaded ordering and positioning tests.

use std::cmp::Ordering;

use crate::skiplist::{EntryOrdering, SkipList};

struct ByteOrder;

impl EntryOrdering for ByteOrder {
    fn compare_entries(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

fn collect_forward(list: &SkipList<ByteOrder>) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut node = list.first();
    while !node.is_null() {
        unsafe {
            out.push(list.entry_of(node).to_vec());
            node = list.next_of(node);
        }
    }
    out
}

#[test]
fn empty_list_positions() {
    let list = SkipList::new(ByteOrder);
    assert!(list.first().is_null());
    assert!(list.last().is_null());
    assert!(list.seek(b"anything").is_null());
    assert!(!list.contains(b"anything"));
}

#[test]
fn inserted_entries_come_back_sorted() {
    let list = SkipList::new(ByteOrder);
    for key in [b"m".as_ref(), b"a", b"z", b"q", b"b"] {
        list.insert(key.to_vec());
    }
    assert_eq!(collect_forward(&list), [b"a".as_ref(), b"b", b"m", b"q", b"z"]);
}

#[test]
fn contains_finds_exact_entries_only() {
    let list = SkipList::new(ByteOrder);
    list.insert(b"k1".to_vec());
    list.insert(b"k3".to_vec());
    assert!(list.contains(b"k1"));
    assert!(list.contains(b"k3"));
    assert!(!list.contains(b"k2"));
    assert!(!list.contains(b"k11"));
}

#[test]
fn seek_lands_on_first_greater_or_equal() {
    let list = SkipList::new(ByteOrder);
    for key in [b"b".as_ref(), b"d", b"f"] {
        list.insert(key.to_vec());
    }

    unsafe {
        assert_eq!(list.entry_of(list.seek(b"a")), b"b");
        assert_eq!(list.entry_of(list.seek(b"b")), b"b");
        assert_eq!(list.entry_of(list.seek(b"c")), b"d");
        assert_eq!(list.entry_of(list.seek(b"f")), b"f");
    }
    assert!(list.seek(b"g").is_null());
}

#[test]
fn seek_before_and_last() {
    let list = SkipList::new(ByteOrder);
    for key in [b"b".as_ref(), b"d", b"f"] {
        list.insert(key.to_vec());
    }

    unsafe {
        assert_eq!(list.entry_of(list.last()), b"f");
        assert_eq!(list.entry_of(list.seek_before(b"f")), b"d");
        assert_eq!(list.entry_of(list.seek_before(b"e")), b"d");
        assert_eq!(list.entry_of(list.seek_before(b"c")), b"b");
    }
    assert!(list.seek_before(b"b").is_null());
    assert!(list.seek_before(b"a").is_null());
}

#[test]
fn prev_of_walks_backwards() {
    let list = SkipList::new(ByteOrder);
    for i in 0..50u32 {
        list.insert(format!("key{i:03}").into_bytes());
    }

    let mut node = list.last();
    let mut seen = Vec::new();
    while !node.is_null() {
        unsafe {
            seen.push(list.entry_of(node).to_vec());
            node = list.prev_of(node);
        }
    }
    seen.reverse();
    assert_eq!(seen, collect_forward(&list));
}

#[test]
fn large_insert_preserves_order() {
    let list = SkipList::new(ByteOrder);
    // Insertion order is scrambled by a multiplicative stride.
    for i in 0..2000u64 {
        let scrambled = (i * 2654435761) % 2000;
        list.insert(format!("{scrambled:08}").into_bytes());
    }
    let all = collect_forward(&list);
    assert_eq!(all.len(), 2000);
    assert!(all.windows(2).all(|w| w[0] < w[1]));
}
