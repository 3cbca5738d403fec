//! The user-facing iterator: collapses multi-version internal entries into
//! one visible `(user key, value)` per key at a fixed sequence horizon.
//!
//! The inner merged stream yields internal keys ordered `(user key asc,
//! sequence desc)`.  Forward scans therefore meet the **newest** entry of
//! each user key first: if it is a value and visible at the horizon, it is
//! emitted and the remaining versions are skipped; if it is a tombstone,
//! the whole key is suppressed.  Reverse scans meet versions
//! oldest-... last, so the iterator buffers the most recent visible value
//! while walking and emits it when the stream moves past the key.
//!
//! A `DbIter` pins the memtables and version it was born against, so the
//! files and nodes it reads outlive any concurrent flush or compaction.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::sync::Arc;

use crate::iterator::{MergingIterator, StorageIterator};
use crate::keys::{
    Comparator, KIND_FOR_SEEK, RecordKind, SequenceNumber, append_internal_key, extract_user_key,
    parse_internal_key,
};
use crate::memtable::MemTable;
use crate::sstable::TableError;
use crate::version::Version;

// ------------------------------------------------------------------------------------------------
// DbIter
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Iterator over the live user keys of the database at one sequence.
pub struct DbIter {
    ucmp: Arc<dyn Comparator>,
    iter: MergingIterator,
    sequence: SequenceNumber,

    direction: Direction,
    valid: bool,

    /// Forward: the user key to skip duplicates/tombstones of.
    /// Reverse: the key of the entry the iterator currently reports.
    saved_key: Vec<u8>,

    /// Reverse only: the buffered value for `saved_key`.
    saved_value: Vec<u8>,

    status: Option<TableError>,

    // Pins: keep the data structures under the child iterators alive.
    _mem: Arc<MemTable>,
    _imm: Option<Arc<MemTable>>,
    _version: Arc<Version>,
}

impl DbIter {
    pub(crate) fn new(
        ucmp: Arc<dyn Comparator>,
        iter: MergingIterator,
        sequence: SequenceNumber,
        mem: Arc<MemTable>,
        imm: Option<Arc<MemTable>>,
        version: Arc<Version>,
    ) -> DbIter {
        DbIter {
            ucmp,
            iter,
            sequence,
            direction: Direction::Forward,
            valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            status: None,
            _mem: mem,
            _imm: imm,
            _version: version,
        }
    }

    /// Is the iterator positioned at an entry?
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// The current user key.
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        match self.direction {
            Direction::Forward => extract_user_key(self.iter.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    /// The current value.
    pub fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        match self.direction {
            Direction::Forward => self.iter.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    /// First error encountered by this iterator or its children.
    pub fn status(&self) -> Result<(), TableError> {
        if let Some(err) = &self.status {
            return Err(err.clone());
        }
        self.iter.status()
    }

    pub fn seek_to_first(&mut self) {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.iter.seek_to_first();
        if self.iter.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    pub fn seek_to_last(&mut self) {
        self.direction = Direction::Reverse;
        self.saved_value.clear();
        self.iter.seek_to_last();
        self.find_prev_user_entry();
    }

    /// Position at the first visible entry with user key ≥ `target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.saved_key.clear();
        append_internal_key(&mut self.saved_key, target, self.sequence, KIND_FOR_SEEK);
        self.iter.seek(&self.saved_key);
        if self.iter.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid);

        match self.direction {
            Direction::Reverse => {
                // The inner iterator sits before every entry of the current
                // key; hop back onto them so the skip logic below works.
                self.direction = Direction::Forward;
                if !self.iter.valid() {
                    self.iter.seek_to_first();
                } else {
                    self.iter.next();
                }
                if !self.iter.valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    return;
                }
            }
            Direction::Forward => {
                // Skip the remaining (older) versions of the current key.
                self.saved_key.clear();
                self.saved_key
                    .extend_from_slice(extract_user_key(self.iter.key()));
                self.iter.next();
                if !self.iter.valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    return;
                }
            }
        }
        self.find_next_user_entry(true);
    }

    pub fn prev(&mut self) {
        debug_assert!(self.valid);

        if self.direction == Direction::Forward {
            // Walk the inner iterator behind every entry of the current
            // user key.
            self.saved_key.clear();
            self.saved_key
                .extend_from_slice(extract_user_key(self.iter.key()));
            loop {
                self.iter.prev();
                if !self.iter.valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    self.saved_value.clear();
                    return;
                }
                if self
                    .ucmp
                    .compare(extract_user_key(self.iter.key()), &self.saved_key)
                    == Ordering::Less
                {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry();
    }

    // --------------------------------------------------------------------------------------------
    // Version-collapsing scans
    // --------------------------------------------------------------------------------------------

    /// Advance to the first entry that is visible, live, and (when
    /// `skipping`) not part of `saved_key`.
    fn find_next_user_entry(&mut self, mut skipping: bool) {
        debug_assert_eq!(self.direction, Direction::Forward);

        enum Step {
            Emit,
            Tombstone(Vec<u8>),
            Advance,
            Corrupt,
        }

        while self.iter.valid() {
            let step = match parse_internal_key(self.iter.key()) {
                None => Step::Corrupt,
                Some(parsed) if parsed.sequence <= self.sequence => match parsed.kind {
                    RecordKind::Deletion => Step::Tombstone(parsed.user_key.to_vec()),
                    RecordKind::Value => {
                        if skipping
                            && self.ucmp.compare(parsed.user_key, &self.saved_key)
                                != Ordering::Greater
                        {
                            // An older version or a tombstoned key.
                            Step::Advance
                        } else {
                            Step::Emit
                        }
                    }
                },
                Some(_) => Step::Advance, // newer than the horizon
            };

            match step {
                Step::Emit => {
                    self.valid = true;
                    self.saved_key.clear();
                    return;
                }
                Step::Tombstone(user_key) => {
                    // Everything at or below this entry for this key is
                    // deleted.
                    self.saved_key = user_key;
                    skipping = true;
                }
                Step::Advance => {}
                Step::Corrupt => self.latch_corruption(),
            }
            self.iter.next();
        }
        self.saved_key.clear();
        self.valid = false;
    }

    /// Walk backwards buffering the newest visible value of the key the
    /// scan settles on.
    fn find_prev_user_entry(&mut self) {
        debug_assert_eq!(self.direction, Direction::Reverse);

        enum Step {
            Stop,
            Buffer(RecordKind),
            Skip,
            Corrupt,
        }

        let mut value_kind = RecordKind::Deletion;
        while self.iter.valid() {
            let step = match parse_internal_key(self.iter.key()) {
                None => Step::Corrupt,
                Some(parsed) if parsed.sequence <= self.sequence => {
                    if value_kind != RecordKind::Deletion
                        && self.ucmp.compare(parsed.user_key, &self.saved_key) == Ordering::Less
                    {
                        // A live value is buffered and the stream moved to
                        // an earlier key: the buffered entry is the answer.
                        Step::Stop
                    } else {
                        Step::Buffer(parsed.kind)
                    }
                }
                Some(_) => Step::Skip,
            };

            match step {
                Step::Stop => break,
                Step::Buffer(kind) => {
                    value_kind = kind;
                    match kind {
                        RecordKind::Deletion => {
                            self.saved_key.clear();
                            self.saved_value.clear();
                        }
                        RecordKind::Value => {
                            let user_key = extract_user_key(self.iter.key()).to_vec();
                            self.saved_key = user_key;
                            self.saved_value.clear();
                            let value = self.iter.value();
                            self.saved_value.extend_from_slice(value);
                        }
                    }
                }
                Step::Skip => {}
                Step::Corrupt => self.latch_corruption(),
            }
            self.iter.prev();
        }

        if value_kind == RecordKind::Deletion {
            // Ran off the front.
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
    }

    /// Record corruption without hiding it behind a skipped entry.
    fn latch_corruption(&mut self) {
        if self.status.is_none() {
            self.status = Some(TableError::Corruption(
                "corrupted internal key in iterator".to_string(),
            ));
        }
    }
}
