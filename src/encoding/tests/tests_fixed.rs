//! Tests for the fixed-width little-endian encodings.

use crate::encoding::*;

// ------------------------------------------------------------------------------------------------
// fixed32
// ------------------------------------------------------------------------------------------------

#[test]
fn fixed32_layout_is_little_endian() {
    let mut buf = Vec::new();
    put_fixed32(&mut buf, 0xDEAD_BEEF);
    assert_eq!(buf, [0xEF, 0xBE, 0xAD, 0xDE]);
    let (decoded, consumed) = get_fixed32(&buf).unwrap();
    assert_eq!(decoded, 0xDEAD_BEEF);
    assert_eq!(consumed, 4);
}

#[test]
fn fixed32_roundtrip_boundaries() {
    for val in [0u32, 1, 0x7F, 0x80, 0xFFFF, u32::MAX] {
        let mut buf = Vec::new();
        put_fixed32(&mut buf, val);
        assert_eq!(decode_fixed32(&buf), val);
    }
}

#[test]
fn fixed32_truncated_input_is_rejected() {
    assert_eq!(
        get_fixed32(&[0x01, 0x02]),
        Err(EncodingError::UnexpectedEof {
            needed: 4,
            available: 2,
        })
    );
}

// ------------------------------------------------------------------------------------------------
// fixed64
// ------------------------------------------------------------------------------------------------

#[test]
fn fixed64_layout_is_little_endian() {
    let mut buf = Vec::new();
    put_fixed64(&mut buf, 0x0102_0304_0506_0708);
    assert_eq!(buf, [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    let (decoded, consumed) = get_fixed64(&buf).unwrap();
    assert_eq!(decoded, 0x0102_0304_0506_0708);
    assert_eq!(consumed, 8);
}

#[test]
fn fixed64_roundtrip_boundaries() {
    for val in [0u64, 1, 0xFF, 1 << 32, (1 << 56) - 1, u64::MAX] {
        let mut buf = Vec::new();
        put_fixed64(&mut buf, val);
        assert_eq!(decode_fixed64(&buf), val);
    }
}

#[test]
fn fixed64_truncated_input_is_rejected() {
    assert!(get_fixed64(&[0u8; 7]).is_err());
}

#[test]
fn fixed_values_concatenate_cleanly() {
    let mut buf = Vec::new();
    put_fixed32(&mut buf, 7);
    put_fixed64(&mut buf, 9);
    let (a, n) = get_fixed32(&buf).unwrap();
    let (b, _) = get_fixed64(&buf[n..]).unwrap();
    assert_eq!((a, b), (7, 9));
}
