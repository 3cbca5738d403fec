//! File-search and overlap logic over hand-built versions.

use crate::keys::MAX_SEQUENCE;
use crate::version::tests::helpers::*;
use crate::version::{NUM_LEVELS, find_file, some_file_overlaps_range};

#[test]
fn find_file_binary_search() {
    let cmp = icmp();
    let files = vec![
        file(1, b"a", b"c"),
        file(2, b"e", b"g"),
        file(3, b"i", b"k"),
    ];

    // Targets at max sequence sort before any stored entry of that user key.
    let probe = |key: &[u8]| find_file(&cmp, &files, ikey(key, MAX_SEQUENCE).encoded());
    assert_eq!(probe(b"0"), 0);
    assert_eq!(probe(b"a"), 0);
    assert_eq!(probe(b"c"), 0);
    assert_eq!(probe(b"d"), 1);
    assert_eq!(probe(b"g"), 1);
    assert_eq!(probe(b"h"), 2);
    assert_eq!(probe(b"k"), 2);
    assert_eq!(probe(b"z"), 3);
}

#[test]
fn disjoint_overlap_checks() {
    let cmp = icmp();
    let files = vec![file(1, b"c", b"f"), file(2, b"m", b"p")];

    let overlaps = |lo: Option<&[u8]>, hi: Option<&[u8]>| {
        some_file_overlaps_range(&cmp, true, &files, lo, hi)
    };

    assert!(!overlaps(Some(b"a"), Some(b"b")));
    assert!(overlaps(Some(b"a"), Some(b"c")));
    assert!(overlaps(Some(b"d"), Some(b"e")));
    assert!(overlaps(Some(b"f"), Some(b"g")));
    assert!(!overlaps(Some(b"g"), Some(b"l")));
    assert!(overlaps(Some(b"g"), Some(b"m")));
    assert!(!overlaps(Some(b"q"), Some(b"z")));

    // Open-ended bounds.
    assert!(overlaps(None, Some(b"c")));
    assert!(!overlaps(None, Some(b"b")));
    assert!(overlaps(Some(b"p"), None));
    assert!(!overlaps(Some(b"q"), None));
    assert!(overlaps(None, None));
}

#[test]
fn level0_overlap_checks_every_file() {
    let cmp = icmp();
    // Overlapping files, as level 0 allows.
    let files = vec![file(1, b"a", b"m"), file(2, b"g", b"z")];
    assert!(some_file_overlaps_range(
        &cmp,
        false,
        &files,
        Some(b"h"),
        Some(b"i")
    ));
    assert!(!some_file_overlaps_range(
        &cmp,
        false,
        &[],
        Some(b"h"),
        Some(b"i")
    ));
}

#[test]
fn overlapping_inputs_on_sorted_level() {
    let cmp = icmp();
    let version = version_with_level(
        2,
        vec![
            file(1, b"a", b"c"),
            file(2, b"e", b"g"),
            file(3, b"i", b"k"),
        ],
    );

    let inputs = version.overlapping_inputs(
        &cmp,
        2,
        Some(&ikey(b"b", MAX_SEQUENCE)),
        Some(&ikey(b"f", 1)),
    );
    let numbers: Vec<u64> = inputs.iter().map(|f| f.number).collect();
    assert_eq!(numbers, vec![1, 2]);

    let none = version.overlapping_inputs(
        &cmp,
        2,
        Some(&ikey(b"cc", MAX_SEQUENCE)),
        Some(&ikey(b"dd", 1)),
    );
    assert!(none.is_empty());
}

#[test]
fn overlapping_inputs_at_level0_expands_transitively() {
    let cmp = icmp();
    // File 2 overlaps the probe; file 1 overlaps file 2's range; file 3 is
    // disjoint from the expanded range.
    let version = version_with_level(
        0,
        vec![
            file(1, b"a", b"e"),
            file(2, b"d", b"h"),
            file(3, b"x", b"z"),
        ],
    );

    let inputs = version.overlapping_inputs(
        &cmp,
        0,
        Some(&ikey(b"g", MAX_SEQUENCE)),
        Some(&ikey(b"g", 1)),
    );
    let mut numbers: Vec<u64> = inputs.iter().map(|f| f.number).collect();
    numbers.sort();
    assert_eq!(numbers, vec![1, 2], "level-0 expansion must pull in file 1");
}

#[test]
fn memtable_output_level_respects_overlap() {
    let cmp = icmp();
    let max_file_size = 2 * 1024 * 1024;

    // Nothing anywhere: may sink to MAX_MEM_COMPACT_LEVEL.
    let empty = version_with_level(3, vec![]);
    assert_eq!(
        empty.pick_level_for_memtable_output(&cmp, max_file_size, b"a", b"b"),
        2
    );

    // Overlap at level 0 pins the output at level 0.
    let l0 = version_with_level(0, vec![file(1, b"a", b"m")]);
    assert_eq!(
        l0.pick_level_for_memtable_output(&cmp, max_file_size, b"b", b"c"),
        0
    );

    // Overlap at level 1 stops the descent below it.
    let l1 = version_with_level(1, vec![file(1, b"a", b"m")]);
    assert_eq!(
        l1.pick_level_for_memtable_output(&cmp, max_file_size, b"b", b"c"),
        0
    );

    // Overlap only at level 2: flush may land at level 1.
    let l2 = version_with_level(2, vec![file(1, b"a", b"m")]);
    assert_eq!(
        l2.pick_level_for_memtable_output(&cmp, max_file_size, b"b", b"c"),
        1
    );
}

#[test]
fn num_files_counts_per_level() {
    let version = version_with_level(4, vec![file(1, b"a", b"b"), file(2, b"c", b"d")]);
    assert_eq!(version.num_files(4), 2);
    for level in 0..NUM_LEVELS {
        if level != 4 {
            assert_eq!(version.num_files(level), 0);
        }
    }
}
