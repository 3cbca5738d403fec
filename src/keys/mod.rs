//! # Key Format and Comparators
//!
//! Every record in the engine is addressed by an **internal key**: the user
//! key followed by an 8-byte little-endian trailer packing a 56-bit sequence
//! number and an 8-bit record kind.
//!
//! ```text
//! [user key bytes][ fixed64_le( sequence << 8 | kind ) ]
//! ```
//!
//! ## Ordering invariants
//!
//! Internal keys sort by:
//!
//! 1. user key **ascending** (per the user-supplied [`Comparator`]),
//! 2. sequence number **descending**,
//! 3. kind **descending**.
//!
//! Because the trailer packs sequence above kind, rules 2 and 3 collapse to
//! "decoded trailer descending".  The newest write for a user key therefore
//! sorts first, and a lookup seeded with [`MAX_SEQUENCE`] lands on the most
//! recent visible version.
//!
//! ## Separator shortening
//!
//! Table builders shrink index entries via
//! [`Comparator::find_shortest_separator`] /
//! [`Comparator::find_short_successor`].  The internal-key comparator must
//! re-append the `(MAX_SEQUENCE, kind-for-seek)` trailer whenever it shortens
//! a user-key prefix, otherwise the shortened key would sort *before* live
//! entries it is meant to follow.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::encoding::{decode_fixed64, put_fixed64, put_varint32};

// ------------------------------------------------------------------------------------------------
// Sequence numbers and record kinds
// ------------------------------------------------------------------------------------------------

/// Monotonic 56-bit counter assigned per individual write operation.
pub type SequenceNumber = u64;

/// Largest representable sequence number; the upper 8 bits of the packed
/// trailer are reserved for the record kind.
pub const MAX_SEQUENCE: SequenceNumber = (1 << 56) - 1;

/// Kind of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RecordKind {
    /// Tombstone: the key was deleted at this sequence.
    Deletion = 0,

    /// Live value.
    Value = 1,
}

/// Kind used when building seek targets.
///
/// Must be the numerically largest kind so that a seek target of
/// `(sequence, KIND_FOR_SEEK)` orders before every entry with the same user
/// key and sequence ≤ `sequence`.
pub const KIND_FOR_SEEK: RecordKind = RecordKind::Value;

impl RecordKind {
    /// Decode a trailer byte. Unknown bytes mean a corrupt internal key.
    pub fn from_u8(byte: u8) -> Option<RecordKind> {
        match byte {
            0 => Some(RecordKind::Deletion),
            1 => Some(RecordKind::Value),
            _ => None,
        }
    }
}

/// Pack a sequence number and record kind into the 8-byte trailer value.
#[inline]
pub fn pack_sequence_and_kind(sequence: SequenceNumber, kind: RecordKind) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE);
    (sequence << 8) | kind as u64
}

// ------------------------------------------------------------------------------------------------
// Comparator trait and the bytewise default
// ------------------------------------------------------------------------------------------------

/// Total order over byte-string keys, plus the two shortening hooks used by
/// table builders to keep index blocks small.
///
/// Implementations must be pure: the same inputs always produce the same
/// ordering, across process restarts.  The [`Comparator::name`] is persisted
/// in the manifest and checked on reopen, so a renamed or re-ordered
/// comparator is rejected rather than silently corrupting the tree.
pub trait Comparator: Send + Sync {
    /// Three-way comparison between two keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Stable identifier persisted in the manifest.
    fn name(&self) -> &'static str;

    /// Shorten `start` in place to some string `s` with `start ≤ s < limit`,
    /// if a shorter separator exists.
    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]);

    /// Shorten `key` in place to some string `s ≥ key`, if one exists.
    fn find_short_successor(&self, key: &mut Vec<u8>);
}

/// Lexicographic byte-order comparator; the engine default.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &'static str {
        "sedimentdb.BytewiseComparator"
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let min_length = start.len().min(limit.len());
        let mut diff_index = 0;
        while diff_index < min_length && start[diff_index] == limit[diff_index] {
            diff_index += 1;
        }

        if diff_index >= min_length {
            // One string is a prefix of the other: do not shorten.
            return;
        }

        let diff_byte = start[diff_index];
        if diff_byte < 0xff && diff_byte + 1 < limit[diff_index] {
            start[diff_index] += 1;
            start.truncate(diff_index + 1);
            debug_assert_eq!(self.compare(start, limit), Ordering::Less);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        // Increment the first byte that is not 0xff and truncate after it.
        // An all-0xff key is its own successor.
        for i in 0..key.len() {
            if key[i] != 0xff {
                key[i] += 1;
                key.truncate(i + 1);
                return;
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Internal keys
// ------------------------------------------------------------------------------------------------

/// Strip the 8-byte trailer, yielding the user-key prefix.
///
/// # Panics
///
/// Debug-asserts that `internal_key` holds at least the trailer.
#[inline]
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= 8);
    &internal_key[..internal_key.len() - 8]
}

/// Append `user_key ‖ trailer` to `dst`.
pub fn append_internal_key(
    dst: &mut Vec<u8>,
    user_key: &[u8],
    sequence: SequenceNumber,
    kind: RecordKind,
) {
    dst.extend_from_slice(user_key);
    put_fixed64(dst, pack_sequence_and_kind(sequence, kind));
}

/// Decoded view of an internal key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    /// The user portion of the key.
    pub user_key: &'a [u8],

    /// Sequence number extracted from the trailer.
    pub sequence: SequenceNumber,

    /// Record kind extracted from the trailer.
    pub kind: RecordKind,
}

/// Split an internal key into its parts.
///
/// Returns `None` when the buffer is shorter than the trailer or the kind
/// byte is not a known [`RecordKind`] — both indicate corruption.
pub fn parse_internal_key(internal_key: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if internal_key.len() < 8 {
        return None;
    }
    let trailer = decode_fixed64(&internal_key[internal_key.len() - 8..]);
    let kind = RecordKind::from_u8((trailer & 0xff) as u8)?;
    Some(ParsedInternalKey {
        user_key: extract_user_key(internal_key),
        sequence: trailer >> 8,
        kind,
    })
}

/// Owned internal key, used for file boundaries and manifest records.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InternalKey {
    encoded: Vec<u8>,
}

impl InternalKey {
    /// Build from parts.
    pub fn new(user_key: &[u8], sequence: SequenceNumber, kind: RecordKind) -> InternalKey {
        let mut encoded = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut encoded, user_key, sequence, kind);
        InternalKey { encoded }
    }

    /// Adopt an already-encoded internal key.
    pub fn from_encoded(encoded: &[u8]) -> InternalKey {
        debug_assert!(encoded.len() >= 8);
        InternalKey {
            encoded: encoded.to_vec(),
        }
    }

    /// The full encoded form.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// The user portion.
    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.encoded)
    }

    /// True for a default-constructed, not-yet-assigned key.
    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match parse_internal_key(&self.encoded) {
            Some(parsed) => write!(
                f,
                "'{}' @ {} : {:?}",
                parsed.user_key.escape_ascii(),
                parsed.sequence,
                parsed.kind
            ),
            None => write!(f, "(bad){}", self.encoded.escape_ascii()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Internal-key comparator
// ------------------------------------------------------------------------------------------------

/// Orders internal keys by (user key asc, trailer desc).
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn Comparator>) -> InternalKeyComparator {
        InternalKeyComparator { user }
    }

    /// The wrapped user comparator.
    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }

    /// Convenience: compare two [`InternalKey`]s.
    pub fn compare_keys(&self, a: &InternalKey, b: &InternalKey) -> Ordering {
        self.compare(a.encoded(), b.encoded())
    }
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.user.compare(extract_user_key(a), extract_user_key(b)) {
            Ordering::Equal => {
                let a_trailer = decode_fixed64(&a[a.len() - 8..]);
                let b_trailer = decode_fixed64(&b[b.len() - 8..]);
                // Larger trailer = newer entry = sorts first.
                b_trailer.cmp(&a_trailer)
            }
            ordering => ordering,
        }
    }

    fn name(&self) -> &'static str {
        "sedimentdb.InternalKeyComparator"
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let mut shortened = user_start.to_vec();
        self.user.find_shortest_separator(&mut shortened, user_limit);
        if shortened.len() < user_start.len()
            && self.user.compare(user_start, &shortened) == Ordering::Less
        {
            // Physically shorter but logically larger: tack on the earliest
            // possible trailer so it still precedes every real entry of the
            // successor key.
            put_fixed64(
                &mut shortened,
                pack_sequence_and_kind(MAX_SEQUENCE, KIND_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(start, &shortened), Ordering::Less);
            debug_assert_eq!(self.compare(&shortened, limit), Ordering::Less);
            *start = shortened;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key);
        let mut shortened = user_key.to_vec();
        self.user.find_short_successor(&mut shortened);
        if shortened.len() < user_key.len()
            && self.user.compare(user_key, &shortened) == Ordering::Less
        {
            put_fixed64(
                &mut shortened,
                pack_sequence_and_kind(MAX_SEQUENCE, KIND_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(key, &shortened), Ordering::Less);
            *key = shortened;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Lookup keys
// ------------------------------------------------------------------------------------------------

/// Pre-encoded probe key for point lookups.
///
/// Holds `varint32(user_key.len() + 8) ‖ user_key ‖ trailer` so that the
/// memtable (which stores length-prefixed internal keys) and the table layer
/// (which stores bare internal keys) can slice their preferred view without
/// re-encoding.
pub struct LookupKey {
    buf: Vec<u8>,

    /// Offset where the internal key begins (after the varint prefix).
    key_start: usize,
}

impl LookupKey {
    /// Build a probe for `user_key` visible at `sequence`.
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> LookupKey {
        let mut buf = Vec::with_capacity(user_key.len() + 13);
        put_varint32(&mut buf, (user_key.len() + 8) as u32);
        let key_start = buf.len();
        append_internal_key(&mut buf, user_key, sequence, KIND_FOR_SEEK);
        LookupKey { buf, key_start }
    }

    /// The memtable form: length-prefixed internal key.
    pub fn memtable_key(&self) -> &[u8] {
        &self.buf
    }

    /// The internal-key form used against tables.
    pub fn internal_key(&self) -> &[u8] {
        &self.buf[self.key_start..]
    }

    /// The bare user key.
    pub fn user_key(&self) -> &[u8] {
        &self.buf[self.key_start..self.buf.len() - 8]
    }
}
