//! Write-then-read roundtrips across block boundaries.

use tempfile::TempDir;

use crate::wal::tests::helpers::*;
use crate::wal::{BLOCK_SIZE, HEADER_SIZE};

#[test]
fn empty_log_reads_nothing() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");
    write_log(&path, &[]);

    let mut reporter = CountingReporter::default();
    assert!(read_log(&path, &mut reporter).is_empty());
    assert_eq!(reporter.drops, 0);
}

#[test]
fn small_records_roundtrip_in_order() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");
    let records = vec![
        b"alpha".to_vec(),
        b"".to_vec(),
        b"beta".to_vec(),
        (0u8..=255).collect(),
    ];
    write_log(&path, &records);

    let mut reporter = CountingReporter::default();
    assert_eq!(read_log(&path, &mut reporter), records);
    assert_eq!(reporter.drops, 0);
}

#[test]
fn record_spanning_several_blocks_is_reassembled() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");
    // Three and a half blocks: First + Middle + Middle + Last.
    let big = blob(1, BLOCK_SIZE * 3 + BLOCK_SIZE / 2);
    let records = vec![b"before".to_vec(), big, b"after".to_vec()];
    write_log(&path, &records);

    let mut reporter = CountingReporter::default();
    assert_eq!(read_log(&path, &mut reporter), records);
    assert_eq!(reporter.drops, 0);
}

#[test]
fn trailer_too_small_for_header_is_padded() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");
    // First record leaves exactly 3 bytes in the block: the writer must
    // zero-pad and continue in the next block.
    let first_len = BLOCK_SIZE - HEADER_SIZE - 3;
    let records = vec![blob(2, first_len), b"next-block".to_vec()];
    write_log(&path, &records);

    let mut reporter = CountingReporter::default();
    assert_eq!(read_log(&path, &mut reporter), records);
    assert_eq!(reporter.drops, 0);
}

#[test]
fn record_fitting_block_exactly_leaves_clean_boundary() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");
    let exact = blob(3, BLOCK_SIZE - HEADER_SIZE);
    let records = vec![exact, b"tail".to_vec()];
    write_log(&path, &records);

    let mut reporter = CountingReporter::default();
    assert_eq!(read_log(&path, &mut reporter), records);
    assert_eq!(reporter.drops, 0);
}

#[test]
fn many_records_of_mixed_sizes() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");
    let mut records = Vec::new();
    for i in 0..200u32 {
        records.push(blob(i as u8, (i as usize * 131) % 4096));
    }
    write_log(&path, &records);

    let mut reporter = CountingReporter::default();
    assert_eq!(read_log(&path, &mut reporter), records);
    assert_eq!(reporter.drops, 0);
}
