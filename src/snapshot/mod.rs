//! Snapshot handles and the ordered list that pins them.
//!
//! A snapshot pins a sequence number: reads through it observe exactly the
//! writes with sequence ≤ that number, and compaction must preserve every
//! version still visible to the **oldest** live snapshot.  The engine
//! consults [`SnapshotList::oldest`] when deciding which shadowed entries
//! and tombstones are safe to drop.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;
use std::sync::Arc;

use crate::keys::SequenceNumber;

// ------------------------------------------------------------------------------------------------
// Snapshot handle
// ------------------------------------------------------------------------------------------------

/// A pinned sequence number.
///
/// Cheap to clone; releasing is explicit via
/// [`Engine::release_snapshot`](crate::engine::Engine::release_snapshot) so
/// that the engine can un-pin compaction GC deterministically.
#[derive(Debug, Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

#[derive(Debug)]
struct SnapshotInner {
    sequence: SequenceNumber,
}

impl Snapshot {
    /// The pinned sequence number.
    pub fn sequence(&self) -> SequenceNumber {
        self.inner.sequence
    }

    fn same_handle(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ------------------------------------------------------------------------------------------------
// Snapshot list
// ------------------------------------------------------------------------------------------------

/// Live snapshots ordered oldest-first.
///
/// Kept inside the engine mutex; sequence numbers are non-decreasing from
/// front to back because snapshots are always created at the current last
/// sequence.
#[derive(Debug, Default)]
pub struct SnapshotList {
    list: VecDeque<Snapshot>,
}

impl SnapshotList {
    pub fn new() -> SnapshotList {
        SnapshotList::default()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// The smallest pinned sequence.
    ///
    /// # Panics
    ///
    /// Panics when the list is empty; callers check [`SnapshotList::is_empty`].
    pub fn oldest(&self) -> SequenceNumber {
        self.list.front().expect("snapshot list is empty").sequence()
    }

    /// Pin `sequence` and return the handle.
    pub fn create(&mut self, sequence: SequenceNumber) -> Snapshot {
        debug_assert!(self.list.back().is_none_or(|s| s.sequence() <= sequence));
        let snapshot = Snapshot {
            inner: Arc::new(SnapshotInner { sequence }),
        };
        self.list.push_back(snapshot.clone());
        snapshot
    }

    /// Remove one handle from the list.
    ///
    /// Matches by handle identity, not sequence, so two snapshots taken at
    /// the same sequence release independently.
    pub fn release(&mut self, snapshot: &Snapshot) {
        if let Some(pos) = self.list.iter().position(|s| s.same_handle(snapshot)) {
            self.list.remove(pos);
        }
    }
}
