//! # MemTable
//!
//! In-memory, multi-version write buffer between the write-ahead log and
//! the first on-disk table.  Entries are never updated in place: a newer
//! write for the same user key shadows the older one purely through the
//! internal-key ordering (sequence descending within a user key).
//!
//! ## Entry encoding
//!
//! Each skiplist entry is one self-contained buffer:
//!
//! ```text
//! varint32(internal_key_len) ‖ internal_key ‖ varint32(value_len) ‖ value
//! ```
//!
//! A point lookup seeks to the first entry ≥ the probe's memtable form and
//! checks whether it still belongs to the probed user key; the entry's kind
//! then decides between "value" and "deleted here".
//!
//! ## Concurrency
//!
//! [`MemTable::add`] inherits the skiplist's single-writer requirement —
//! the engine's writer queue serialises it.  Reads and iteration are
//! lock-free and may run concurrently with the writer.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrd};

use crate::encoding::{get_length_prefixed_slice, put_length_prefixed_slice, put_varint32, varint_length};
use crate::iterator::StorageIterator;
use crate::keys::{
    Comparator, InternalKeyComparator, LookupKey, RecordKind, SequenceNumber, append_internal_key,
    extract_user_key, parse_internal_key,
};
use crate::skiplist::{EntryOrdering, Node, SkipList};
use crate::sstable::TableError;

// ------------------------------------------------------------------------------------------------
// Entry ordering over the memtable encoding
// ------------------------------------------------------------------------------------------------

/// Orders encoded entries by their length-prefixed internal key.
struct MemtableEntryOrdering {
    cmp: InternalKeyComparator,
}

impl EntryOrdering for MemtableEntryOrdering {
    fn compare_entries(&self, a: &[u8], b: &[u8]) -> Ordering {
        let (a_key, _) = get_length_prefixed_slice(a).expect("corrupt memtable entry");
        let (b_key, _) = get_length_prefixed_slice(b).expect("corrupt memtable entry");
        self.cmp.compare(a_key, b_key)
    }
}

// ------------------------------------------------------------------------------------------------
// MemTable
// ------------------------------------------------------------------------------------------------

/// Result of a memtable point lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum MemTableGet {
    /// The key's newest visible entry is a live value.
    Value(Vec<u8>),

    /// The key's newest visible entry is a tombstone: stop probing older
    /// layers and report not-found.
    Deleted,

    /// This table holds nothing visible for the key; probe older layers.
    NotFound,
}

/// See the module docs.
pub struct MemTable {
    cmp: InternalKeyComparator,
    table: SkipList<MemtableEntryOrdering>,
    memory_usage: AtomicUsize,
}

impl MemTable {
    pub fn new(cmp: InternalKeyComparator) -> MemTable {
        let ordering = MemtableEntryOrdering { cmp: cmp.clone() };
        MemTable {
            cmp,
            table: SkipList::new(ordering),
            memory_usage: AtomicUsize::new(0),
        }
    }

    /// Bytes of entry data held; the rotation threshold compares against
    /// this.
    pub fn approximate_memory_usage(&self) -> usize {
        self.memory_usage.load(AtomicOrd::Relaxed)
    }

    /// Append one version. Requires the engine's single-writer discipline.
    pub fn add(&self, sequence: SequenceNumber, kind: RecordKind, key: &[u8], value: &[u8]) {
        let internal_key_len = key.len() + 8;
        let encoded_len = varint_length(internal_key_len as u64)
            + internal_key_len
            + varint_length(value.len() as u64)
            + value.len();

        let mut buf = Vec::with_capacity(encoded_len);
        put_varint32(&mut buf, internal_key_len as u32);
        append_internal_key(&mut buf, key, sequence, kind);
        put_length_prefixed_slice(&mut buf, value);
        debug_assert_eq!(buf.len(), encoded_len);

        self.table.insert(buf);
        self.memory_usage.fetch_add(encoded_len, AtomicOrd::Relaxed);
    }

    /// Point lookup at the probe's sequence horizon.
    pub fn get(&self, key: &LookupKey) -> MemTableGet {
        let node = self.table.seek(key.memtable_key());
        if node.is_null() {
            return MemTableGet::NotFound;
        }

        // SAFETY: the node came from this table, which outlives the borrow.
        let entry = unsafe { self.table.entry_of(node) };
        let (internal_key, consumed) =
            get_length_prefixed_slice(entry).expect("corrupt memtable entry");

        // The seek already skipped every entry with a too-new sequence; it
        // may still have landed on a different user key entirely.
        if self
            .cmp
            .user_comparator()
            .compare(extract_user_key(internal_key), key.user_key())
            != Ordering::Equal
        {
            return MemTableGet::NotFound;
        }

        let parsed = parse_internal_key(internal_key).expect("corrupt memtable entry");
        match parsed.kind {
            RecordKind::Value => {
                let (value, _) = get_length_prefixed_slice(&entry[consumed..])
                    .expect("corrupt memtable entry");
                MemTableGet::Value(value.to_vec())
            }
            RecordKind::Deletion => MemTableGet::Deleted,
        }
    }

    /// Iterator over the internal-key entries; pins the table via `Arc`.
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            mem: Arc::clone(self),
            node: std::ptr::null(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Iterator
// ------------------------------------------------------------------------------------------------

/// Yields `(internal key, value)` pairs in internal-key order.
///
/// Holds the memtable alive through an `Arc`; node pointers stay valid for
/// the iterator's whole lifetime because the skiplist frees nothing until
/// drop.
pub struct MemTableIterator {
    mem: Arc<MemTable>,
    node: *const Node,
}

impl MemTableIterator {
    fn entry(&self) -> &[u8] {
        debug_assert!(!self.node.is_null());
        // SAFETY: `node` is valid and `mem` keeps the skiplist alive.
        unsafe { self.mem.table.entry_of(self.node) }
    }

    /// Encode `target` (an internal key) into the memtable seek form.
    fn seek_encoding(target: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(target.len() + 5);
        put_length_prefixed_slice(&mut buf, target);
        buf
    }
}

impl StorageIterator for MemTableIterator {
    fn valid(&self) -> bool {
        !self.node.is_null()
    }

    fn seek_to_first(&mut self) {
        self.node = self.mem.table.first();
    }

    fn seek_to_last(&mut self) {
        self.node = self.mem.table.last();
    }

    fn seek(&mut self, target: &[u8]) {
        self.node = self.mem.table.seek(&Self::seek_encoding(target));
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        // SAFETY: `node` is valid while the iterator holds the table.
        self.node = unsafe { self.mem.table.next_of(self.node) };
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        // SAFETY: as in `next`.
        self.node = unsafe { self.mem.table.prev_of(self.node) };
    }

    fn key(&self) -> &[u8] {
        let (internal_key, _) =
            get_length_prefixed_slice(self.entry()).expect("corrupt memtable entry");
        internal_key
    }

    fn value(&self) -> &[u8] {
        let entry = self.entry();
        let (_, consumed) = get_length_prefixed_slice(entry).expect("corrupt memtable entry");
        let (value, _) =
            get_length_prefixed_slice(&entry[consumed..]).expect("corrupt memtable entry");
        value
    }

    fn status(&self) -> Result<(), TableError> {
        Ok(())
    }
}
