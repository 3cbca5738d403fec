//! # WriteBatch
//!
//! Atomic multi-operation container.  A batch is exactly the bytes that go
//! into the write-ahead log, so building one is also serialising it:
//!
//! ```text
//! batch := sequence(8 LE) count(4 LE) op*
//! op    := 0x01 varstring(key) varstring(value)      # put
//!        | 0x00 varstring(key)                       # delete
//! ```
//!
//! The sequence field holds the sequence number of the **first** operation;
//! operation `i` commits at `sequence + i`.  The engine's write leader may
//! append several waiting batches into one before logging, which is why
//! [`WriteBatch::append`] exists.
//!
//! A batch decoded from a recovered log may be damaged; iteration reports
//! [`BatchError::Corruption`] instead of panicking.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use thiserror::Error;

use crate::encoding::{
    decode_fixed32, decode_fixed64, get_length_prefixed_slice, put_length_prefixed_slice,
};
use crate::keys::{RecordKind, SequenceNumber};
use crate::memtable::MemTable;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// `sequence(8) ‖ count(4)`.
pub const BATCH_HEADER_SIZE: usize = 12;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors from decoding a batch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    /// The serialised form is malformed (short header, bad tag, truncated
    /// operation, or a count that disagrees with the contents).
    #[error("Corruption: {0}")]
    Corruption(&'static str),
}

// ------------------------------------------------------------------------------------------------
// WriteBatch
// ------------------------------------------------------------------------------------------------

/// One decoded operation, borrowed from the batch representation.
#[derive(Debug, PartialEq, Eq)]
pub enum BatchOp<'a> {
    Put { key: &'a [u8], value: &'a [u8] },
    Delete { key: &'a [u8] },
}

/// See the module docs.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

impl Default for WriteBatch {
    fn default() -> WriteBatch {
        WriteBatch::new()
    }
}

impl WriteBatch {
    pub fn new() -> WriteBatch {
        WriteBatch {
            rep: vec![0; BATCH_HEADER_SIZE],
        }
    }

    /// Queue an insert of `key` → `value`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(RecordKind::Value as u8);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    /// Queue a tombstone for `key`.
    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(RecordKind::Deletion as u8);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    /// Drop every queued operation.
    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(BATCH_HEADER_SIZE, 0);
    }

    /// Serialised size in bytes (also the WAL payload size).
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    /// Number of queued operations.
    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..12])
    }

    pub(crate) fn set_count(&mut self, count: u32) {
        self.rep[8..12].copy_from_slice(&count.to_le_bytes());
    }

    /// Sequence number assigned to the first operation.
    pub(crate) fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep[0..8])
    }

    pub(crate) fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.rep[0..8].copy_from_slice(&sequence.to_le_bytes());
    }

    /// The WAL payload.
    pub(crate) fn contents(&self) -> &[u8] {
        &self.rep
    }

    /// Adopt a serialised batch recovered from the log.
    pub(crate) fn from_contents(contents: Vec<u8>) -> Result<WriteBatch, BatchError> {
        if contents.len() < BATCH_HEADER_SIZE {
            return Err(BatchError::Corruption("batch is smaller than its header"));
        }
        Ok(WriteBatch { rep: contents })
    }

    /// Append every operation of `other` to this batch.
    pub fn append(&mut self, other: &WriteBatch) {
        self.set_count(self.count() + other.count());
        self.rep.extend_from_slice(&other.rep[BATCH_HEADER_SIZE..]);
    }

    /// Decode the operations in insertion order.
    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            rest: &self.rep[BATCH_HEADER_SIZE..],
            remaining: self.count(),
            failed: false,
        }
    }

    /// Apply the batch to `mem`, assigning `sequence + i` to operation `i`.
    pub(crate) fn insert_into(&self, mem: &MemTable) -> Result<(), BatchError> {
        let mut sequence = self.sequence();
        let mut found: u32 = 0;
        for op in self.iter() {
            match op? {
                BatchOp::Put { key, value } => mem.add(sequence, RecordKind::Value, key, value),
                BatchOp::Delete { key } => mem.add(sequence, RecordKind::Deletion, key, b""),
            }
            sequence += 1;
            found += 1;
        }
        if found != self.count() {
            return Err(BatchError::Corruption("batch count mismatch"));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Iteration
// ------------------------------------------------------------------------------------------------

/// Streaming decoder over a batch's operations.
pub struct BatchIter<'a> {
    rest: &'a [u8],
    remaining: u32,
    failed: bool,
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = Result<BatchOp<'a>, BatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.rest.is_empty() {
            return if self.remaining == 0 {
                None
            } else {
                self.failed = true;
                Some(Err(BatchError::Corruption("batch ends before its count")))
            };
        }
        if self.remaining == 0 {
            self.failed = true;
            return Some(Err(BatchError::Corruption("batch has operations past its count")));
        }
        self.remaining -= 1;

        let tag = self.rest[0];
        self.rest = &self.rest[1..];

        let mut take_slice = || -> Result<&'a [u8], BatchError> {
            let (slice, consumed) = get_length_prefixed_slice(self.rest)
                .map_err(|_| BatchError::Corruption("truncated batch operation"))?;
            self.rest = &self.rest[consumed..];
            Ok(slice)
        };

        let op = match RecordKind::from_u8(tag) {
            Some(RecordKind::Value) => {
                let key = match take_slice() {
                    Ok(k) => k,
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                };
                let value = match take_slice() {
                    Ok(v) => v,
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                };
                BatchOp::Put { key, value }
            }
            Some(RecordKind::Deletion) => {
                let key = match take_slice() {
                    Ok(k) => k,
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                };
                BatchOp::Delete { key }
            }
            None => {
                self.failed = true;
                return Some(Err(BatchError::Corruption("unknown batch operation tag")));
            }
        };
        Some(Ok(op))
    }
}
