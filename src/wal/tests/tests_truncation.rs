//! Torn-tail behaviour: a writer crash mid-record must read as clean EOF.

use tempfile::TempDir;

use crate::wal::tests::helpers::*;
use crate::wal::{BLOCK_SIZE, HEADER_SIZE};

#[test]
fn truncation_inside_payload_drops_only_the_torn_record() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");
    write_log(&path, &[b"keep-me".to_vec(), b"torn-record".to_vec()]);

    // Cut inside the second record's payload.
    let keep = HEADER_SIZE + 7;
    truncate_to(&path, keep + HEADER_SIZE + 4);

    let mut reporter = CountingReporter::default();
    let records = read_log(&path, &mut reporter);
    assert_eq!(records, vec![b"keep-me".to_vec()]);
    // A torn tail is a crash signature, not corruption.
    assert_eq!(reporter.drops, 0);
}

#[test]
fn truncation_inside_header_is_silent_eof() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");
    write_log(&path, &[b"keep-me".to_vec(), b"torn".to_vec()]);

    let keep = HEADER_SIZE + 7;
    truncate_to(&path, keep + 3); // 3 bytes of the next header

    let mut reporter = CountingReporter::default();
    let records = read_log(&path, &mut reporter);
    assert_eq!(records, vec![b"keep-me".to_vec()]);
    assert_eq!(reporter.drops, 0);
}

#[test]
fn truncation_of_fragmented_record_discards_partial_assembly() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");
    let records = vec![b"whole".to_vec(), blob(5, BLOCK_SIZE * 2)];
    write_log(&path, &records);

    // Keep the First fragment and a bit of the Middle: the assembled
    // prefix must be thrown away without a corruption report.
    truncate_to(&path, BLOCK_SIZE + 100);

    let mut reporter = CountingReporter::default();
    let got = read_log(&path, &mut reporter);
    assert_eq!(got, vec![b"whole".to_vec()]);
    assert_eq!(reporter.drops, 0);
}

#[test]
fn rewritten_log_after_truncation_accepts_new_records() {
    // Recovery truncates at the torn tail and the engine then opens a new
    // log; simulate the sequence at the framing layer.
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");
    write_log(&path, &[b"a".to_vec(), b"b".to_vec()]);
    truncate_to(&path, HEADER_SIZE); // only a's header survives

    let mut reporter = CountingReporter::default();
    assert!(read_log(&path, &mut reporter).is_empty());
    assert_eq!(reporter.drops, 0);

    write_log(&path, &[b"fresh".to_vec()]);
    let mut reporter = CountingReporter::default();
    assert_eq!(read_log(&path, &mut reporter), vec![b"fresh".to_vec()]);
}
