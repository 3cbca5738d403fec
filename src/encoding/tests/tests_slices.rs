//! Tests for length-prefixed slices.

use crate::encoding::*;

#[test]
fn slice_roundtrip() {
    let mut buf = Vec::new();
    put_length_prefixed_slice(&mut buf, b"hello");
    put_length_prefixed_slice(&mut buf, b"");
    put_length_prefixed_slice(&mut buf, b"world");

    let (a, n) = get_length_prefixed_slice(&buf).unwrap();
    assert_eq!(a, b"hello");
    let (b, m) = get_length_prefixed_slice(&buf[n..]).unwrap();
    assert_eq!(b, b"");
    let (c, _) = get_length_prefixed_slice(&buf[n + m..]).unwrap();
    assert_eq!(c, b"world");
}

#[test]
fn slice_prefix_is_a_varint() {
    let payload = vec![0xAB; 200];
    let mut buf = Vec::new();
    put_length_prefixed_slice(&mut buf, &payload);
    // 200 needs a two-byte varint.
    assert_eq!(buf.len(), 2 + payload.len());
    let (decoded, consumed) = get_length_prefixed_slice(&buf).unwrap();
    assert_eq!(decoded, &payload[..]);
    assert_eq!(consumed, buf.len());
}

#[test]
fn slice_with_binary_content_roundtrips() {
    let payload: Vec<u8> = (0..=255).collect();
    let mut buf = Vec::new();
    put_length_prefixed_slice(&mut buf, &payload);
    let (decoded, _) = get_length_prefixed_slice(&buf).unwrap();
    assert_eq!(decoded, &payload[..]);
}

#[test]
fn slice_truncated_payload_is_rejected() {
    let mut buf = Vec::new();
    put_length_prefixed_slice(&mut buf, b"truncate-me");
    buf.truncate(buf.len() - 3);
    assert!(get_length_prefixed_slice(&buf).is_err());
}

#[test]
fn slice_truncated_prefix_is_rejected() {
    assert!(get_length_prefixed_slice(&[]).is_err());
}
