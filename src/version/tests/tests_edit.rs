//! VersionEdit encode/decode roundtrips and corruption rejection.

use crate::version::edit::VersionEdit;
use crate::version::tests::helpers::*;

#[test]
fn empty_edit_roundtrips() {
    let edit = VersionEdit::new();
    let decoded = VersionEdit::decode(&edit.encode()).unwrap();
    assert_eq!(decoded, edit);
}

#[test]
fn full_edit_roundtrips() {
    let mut edit = VersionEdit::new();
    edit.comparator_name = Some("sedimentdb.BytewiseComparator".to_string());
    edit.log_number = Some(9);
    edit.next_file_number = Some(42);
    edit.last_sequence = Some(123456789);
    edit.set_compact_pointer(1, ikey(b"cursor", 7));
    edit.remove_file(2, 17);
    edit.remove_file(0, 3);
    edit.add_file(0, 18, 4096, ikey(b"aaa", 50), ikey(b"mmm", 40));
    edit.add_file(3, 19, 1 << 30, ikey(b"nnn", 9), ikey(b"zzz", 1));

    let decoded = VersionEdit::decode(&edit.encode()).unwrap();
    assert_eq!(decoded, edit);
}

#[test]
fn repeated_roundtrips_are_stable() {
    let mut edit = VersionEdit::new();
    edit.add_file(1, 5, 100, ikey(b"a", 2), ikey(b"b", 1));
    let once = edit.encode();
    let twice = VersionEdit::decode(&once).unwrap().encode();
    assert_eq!(once, twice);
}

#[test]
fn unknown_tag_is_corruption() {
    let mut bytes = VersionEdit::new().encode();
    bytes.push(0x63); // tag 99
    assert!(VersionEdit::decode(&bytes).is_err());
}

#[test]
fn truncated_field_is_corruption() {
    let mut edit = VersionEdit::new();
    edit.add_file(1, 5, 100, ikey(b"abcdef", 2), ikey(b"ghijkl", 1));
    let bytes = edit.encode();
    assert!(VersionEdit::decode(&bytes[..bytes.len() - 4]).is_err());
}

#[test]
fn out_of_range_level_is_corruption() {
    let mut edit = VersionEdit::new();
    edit.remove_file(0, 1);
    let mut bytes = edit.encode();
    // Rewrite the level byte (tag varint, then level varint) to 200.
    assert_eq!(bytes[0], 6); // deleted-file tag
    bytes[1] = 200;
    assert!(VersionEdit::decode(&bytes).is_err());
}
