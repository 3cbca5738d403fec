//! Deterministic binary primitives shared by every on-disk format.
//!
//! All persistent structures — write-ahead log records, table blocks,
//! manifest edits — are byte-stable compositions of the few encodings in
//! this module.  Because the crate owns this format, the on-disk
//! representation **never** changes due to a dependency upgrade.
//!
//! # Wire format
//!
//! | Shape                  | Encoding                                      |
//! |------------------------|-----------------------------------------------|
//! | fixed 32-bit           | 4 bytes, little-endian                        |
//! | fixed 64-bit           | 8 bytes, little-endian                        |
//! | varint 32-bit          | LEB128, 7 bits per byte, high bit = continue  |
//! | varint 64-bit          | LEB128, at most 10 bytes                      |
//! | length-prefixed slice  | `varint32(len)` followed by the raw bytes     |
//!
//! Varints of 32-bit values occupy at most 5 bytes.  Encoders append to a
//! caller-supplied `Vec<u8>`; decoders read from the front of a slice and
//! return `(value, bytes_consumed)` so callers can advance a cursor through
//! a buffer of consecutive items.
//!
//! # Zero-panic guarantee
//!
//! No function here panics on malformed input.  Truncated or overlong
//! encodings are reported via [`EncodingError`].

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced while decoding the wire primitives.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} more bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A varint used more continuation bytes than its width allows.
    #[error("varint overflows a {bits}-bit value")]
    VarintOverflow {
        /// Width of the target integer.
        bits: u32,
    },
}

// ------------------------------------------------------------------------------------------------
// Fixed-width encodings
// ------------------------------------------------------------------------------------------------

/// Append `value` as 4 little-endian bytes.
#[inline]
pub fn put_fixed32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Append `value` as 8 little-endian bytes.
#[inline]
pub fn put_fixed64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Read 4 little-endian bytes from the front of `buf`.
///
/// Callers that have already validated the length may index directly; this
/// checked form is for parsing untrusted file contents.
#[inline]
pub fn get_fixed32(buf: &[u8]) -> Result<(u32, usize), EncodingError> {
    require(buf, 4)?;
    Ok((decode_fixed32(buf), 4))
}

/// Read 8 little-endian bytes from the front of `buf`.
#[inline]
pub fn get_fixed64(buf: &[u8]) -> Result<(u64, usize), EncodingError> {
    require(buf, 8)?;
    Ok((decode_fixed64(buf), 8))
}

/// Decode 4 little-endian bytes.
///
/// # Panics
///
/// Panics if `buf` holds fewer than 4 bytes.  Use [`get_fixed32`] for
/// untrusted input.
#[inline]
pub fn decode_fixed32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Decode 8 little-endian bytes.
///
/// # Panics
///
/// Panics if `buf` holds fewer than 8 bytes.  Use [`get_fixed64`] for
/// untrusted input.
#[inline]
pub fn decode_fixed64(buf: &[u8]) -> u64 {
    u64::from_le_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])
}

// ------------------------------------------------------------------------------------------------
// Varint encodings
// ------------------------------------------------------------------------------------------------

/// Append `value` as a LEB128 varint (1–5 bytes).
pub fn put_varint32(buf: &mut Vec<u8>, value: u32) {
    put_varint64(buf, u64::from(value));
}

/// Append `value` as a LEB128 varint (1–10 bytes).
pub fn put_varint64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Number of bytes [`put_varint64`] would emit for `value`.
pub fn varint_length(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Decode a 32-bit varint from the front of `buf`.
pub fn get_varint32(buf: &[u8]) -> Result<(u32, usize), EncodingError> {
    let (value, consumed) = get_varint64(buf)?;
    u32::try_from(value)
        .map(|v| (v, consumed))
        .map_err(|_| EncodingError::VarintOverflow { bits: 32 })
}

/// Decode a 64-bit varint from the front of `buf`.
pub fn get_varint64(buf: &[u8]) -> Result<(u64, usize), EncodingError> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte < 0x80 {
            return Ok((value, i + 1));
        }
    }
    if buf.len() < 10 {
        Err(EncodingError::UnexpectedEof {
            needed: 1,
            available: 0,
        })
    } else {
        Err(EncodingError::VarintOverflow { bits: 64 })
    }
}

// ------------------------------------------------------------------------------------------------
// Length-prefixed slices
// ------------------------------------------------------------------------------------------------

/// Append `varint32(len)` followed by the bytes of `value`.
pub fn put_length_prefixed_slice(buf: &mut Vec<u8>, value: &[u8]) {
    put_varint32(buf, value.len() as u32);
    buf.extend_from_slice(value);
}

/// Decode a length-prefixed slice from the front of `buf`.
///
/// Returns a view into `buf` and the total bytes consumed (prefix + data).
pub fn get_length_prefixed_slice(buf: &[u8]) -> Result<(&[u8], usize), EncodingError> {
    let (len, prefix) = get_varint32(buf)?;
    let len = len as usize;
    require(&buf[prefix..], len)?;
    Ok((&buf[prefix..prefix + len], prefix + len))
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

/// Verify that `buf` has at least `needed` bytes.
#[inline]
fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}
