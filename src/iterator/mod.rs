//! # Iterator Abstractions
//!
//! Storage iterators — memtable, table blocks, whole tables, level file
//! sets — share the [`StorageIterator`] seek/scan interface and compose as
//! boxed trait objects.  The interface is positional, not streaming: an
//! iterator is created invalid, a `seek*` call positions it, and `key` /
//! `value` borrow from the iterator until the next repositioning.
//!
//! [`MergingIterator`] unifies N children into one sorted stream, used by
//! both user-facing scans (memtable + immutable memtable + level files) and
//! compaction input merging.  It tracks a scan direction so that reversing
//! mid-scan repositions the non-current children correctly.

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

use crate::keys::Comparator;
use crate::sstable::TableError;

// ------------------------------------------------------------------------------------------------
// The iterator trait
// ------------------------------------------------------------------------------------------------

/// Positional iterator over ordered key/value bytes.
///
/// After construction the position is invalid; callers must seek first.
/// `key`/`value` may only be called while [`StorageIterator::valid`] holds.
pub trait StorageIterator {
    fn valid(&self) -> bool;

    fn seek_to_first(&mut self);

    fn seek_to_last(&mut self);

    /// Position at the first entry with key ≥ `target`.
    fn seek(&mut self, target: &[u8]);

    fn next(&mut self);

    fn prev(&mut self);

    fn key(&self) -> &[u8];

    fn value(&self) -> &[u8];

    /// First error encountered, if any. An iterator with a non-ok status
    /// may silently be missing entries.
    fn status(&self) -> Result<(), TableError>;
}

/// Iterator over nothing, optionally carrying an error.
pub struct EmptyIterator {
    status: Option<TableError>,
}

impl EmptyIterator {
    pub fn new() -> EmptyIterator {
        EmptyIterator { status: None }
    }

    pub fn with_error(error: TableError) -> EmptyIterator {
        EmptyIterator {
            status: Some(error),
        }
    }
}

impl Default for EmptyIterator {
    fn default() -> EmptyIterator {
        EmptyIterator::new()
    }
}

impl StorageIterator for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }

    fn seek_to_first(&mut self) {}

    fn seek_to_last(&mut self) {}

    fn seek(&mut self, _target: &[u8]) {}

    fn next(&mut self) {}

    fn prev(&mut self) {}

    fn key(&self) -> &[u8] {
        panic!("key() on invalid iterator")
    }

    fn value(&self) -> &[u8] {
        panic!("value() on invalid iterator")
    }

    fn status(&self) -> Result<(), TableError> {
        match &self.status {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Merging iterator
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges N sorted children into one sorted stream.
///
/// A linear scan over the children per step is used instead of a heap: the
/// engine merges a handful of iterators (memtable, imm, one per L0 file,
/// one per deeper level), so the constant factor wins.
pub struct MergingIterator {
    cmp: Arc<dyn Comparator>,
    children: Vec<Box<dyn StorageIterator>>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIterator {
    pub fn new(cmp: Arc<dyn Comparator>, children: Vec<Box<dyn StorageIterator>>) -> MergingIterator {
        MergingIterator {
            cmp,
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if child.valid()
                && smallest.is_none_or(|s| {
                    self.cmp.compare(child.key(), self.children[s].key()) == Ordering::Less
                })
            {
                smallest = Some(i);
            }
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate().rev() {
            if child.valid()
                && largest.is_none_or(|l| {
                    self.cmp.compare(child.key(), self.children[l].key()) == Ordering::Greater
                })
            {
                largest = Some(i);
            }
        }
        self.current = largest;
    }
}

impl StorageIterator for MergingIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.find_largest();
        self.direction = Direction::Reverse;
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn next(&mut self) {
        let current = self.current.expect("next() on invalid iterator");

        // When turning around, every non-current child must be positioned
        // at the first entry after the current key: the current child
        // already is, the others are at or before it.
        if self.direction != Direction::Forward {
            let pivot = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&pivot);
                if child.valid() && self.cmp.compare(&pivot, child.key()) == Ordering::Equal {
                    child.next();
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        let current = self.current.expect("prev() on invalid iterator");

        // Mirror of `next`: position every non-current child before the
        // current key.
        if self.direction != Direction::Reverse {
            let pivot = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&pivot);
                if child.valid() {
                    // Child sits at the first entry ≥ pivot; step back.
                    child.prev();
                } else {
                    // No entries ≥ pivot: the child's last entry precedes it.
                    child.seek_to_last();
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        let current = self.current.expect("key() on invalid iterator");
        self.children[current].key()
    }

    fn value(&self) -> &[u8] {
        let current = self.current.expect("value() on invalid iterator");
        self.children[current].value()
    }

    fn status(&self) -> Result<(), TableError> {
        for child in &self.children {
            child.status()?;
        }
        Ok(())
    }
}
