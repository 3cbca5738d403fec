//! # SkipList
//!
//! Ordered set of byte entries backing the memtable.
//!
//! ## Concurrency contract
//!
//! - **One writer at a time.** [`SkipList::insert`] requires external
//!   serialisation; the engine's writer queue provides it.
//! - **Any number of readers, no locks.** A node is published by storing its
//!   pointer into the predecessor's `next` slot with release ordering, after
//!   the node's entry and forward pointers are fully initialised.  Readers
//!   load `next` pointers with acquire ordering, so a reachable node is
//!   always fully visible.
//! - Nodes are never unlinked or freed while the list is alive; memory is
//!   reclaimed only in `Drop`, by which time no reader can hold a reference.
//!
//! The height of a new node follows a geometric distribution with branching
//! factor 4, capped at [`MAX_HEIGHT`].  `max_height` is read with relaxed
//! ordering: a reader observing a stale (smaller) height simply starts its
//! descent lower, and one observing a newer height finds null forward
//! pointers at the not-yet-populated levels and descends immediately.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::ptr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering as AtomicOrd};

use oorandom::Rand32;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Tallest tower a node may have.
pub const MAX_HEIGHT: usize = 12;

/// One-in-`BRANCHING` chance of growing a node by one level.
const BRANCHING: u32 = 4;

const HEIGHT_RNG_SEED: u64 = 0xdead_beef;

// ------------------------------------------------------------------------------------------------
// Entry ordering
// ------------------------------------------------------------------------------------------------

/// Total order over the raw entry encoding stored in the list.
pub trait EntryOrdering: Send + Sync {
    fn compare_entries(&self, a: &[u8], b: &[u8]) -> Ordering;
}

// ------------------------------------------------------------------------------------------------
// Node
// ------------------------------------------------------------------------------------------------

/// List node. `next.len()` is the node's height; slot `i` links level `i`.
pub(crate) struct Node {
    entry: Box<[u8]>,
    next: Vec<AtomicPtr<Node>>,
}

impl Node {
    fn alloc(entry: Box<[u8]>, height: usize) -> *mut Node {
        let next = (0..height).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        Box::into_raw(Box::new(Node { entry, next }))
    }

    #[inline]
    fn next(&self, level: usize) -> *mut Node {
        self.next[level].load(AtomicOrd::Acquire)
    }

    #[inline]
    fn next_relaxed(&self, level: usize) -> *mut Node {
        // Writer-only path: the single writer wrote these slots itself.
        self.next[level].load(AtomicOrd::Relaxed)
    }
}

// ------------------------------------------------------------------------------------------------
// SkipList
// ------------------------------------------------------------------------------------------------

/// See the module docs for the concurrency contract.
pub struct SkipList<C: EntryOrdering> {
    cmp: C,
    head: *mut Node,
    max_height: AtomicUsize,

    /// Height generator; touched only by the (externally serialised) writer.
    rng: Mutex<Rand32>,
}

// SAFETY: all shared mutation goes through atomics with the orderings
// described in the module docs; `head` and node memory are owned by the
// list and freed only in `Drop`.
unsafe impl<C: EntryOrdering> Send for SkipList<C> {}
unsafe impl<C: EntryOrdering> Sync for SkipList<C> {}

impl<C: EntryOrdering> SkipList<C> {
    pub fn new(cmp: C) -> SkipList<C> {
        SkipList {
            cmp,
            head: Node::alloc(Box::new([]), MAX_HEIGHT),
            max_height: AtomicUsize::new(1),
            rng: Mutex::new(Rand32::new(HEIGHT_RNG_SEED)),
        }
    }

    #[inline]
    fn height(&self) -> usize {
        self.max_height.load(AtomicOrd::Relaxed)
    }

    fn random_height(&self) -> usize {
        let mut rng = self.rng.lock().expect("skiplist rng poisoned");
        let mut height = 1;
        while height < MAX_HEIGHT && rng.rand_range(0..BRANCHING) == 0 {
            height += 1;
        }
        height
    }

    /// Insert `entry`.
    ///
    /// Requires the external single-writer discipline; entries must be
    /// unique under the ordering (the memtable guarantees this because
    /// every entry carries a distinct sequence number).
    pub fn insert(&self, entry: Vec<u8>) {
        let mut prev: [*mut Node; MAX_HEIGHT] = [ptr::null_mut(); MAX_HEIGHT];
        let existing = self.find_greater_or_equal(&entry, Some(&mut prev));
        debug_assert!(
            existing.is_null()
                || self
                    .cmp
                    .compare_entries(unsafe { &(*existing).entry }, &entry)
                    != Ordering::Equal,
            "duplicate skiplist entry"
        );

        let height = self.random_height();
        let current = self.height();
        if height > current {
            for slot in prev.iter_mut().take(height).skip(current) {
                *slot = self.head;
            }
            // Relaxed is sufficient: concurrent readers cope with either the
            // old or the new height (see module docs).
            self.max_height.store(height, AtomicOrd::Relaxed);
        }

        let node = Node::alloc(entry.into_boxed_slice(), height);
        for level in 0..height {
            // SAFETY: `prev[level]` points at a live node owned by this
            // list; `node` is fully initialised before the release store
            // below publishes it.
            unsafe {
                (&(*node).next)[level]
                    .store((*prev[level]).next_relaxed(level), AtomicOrd::Relaxed);
                (&(*prev[level]).next)[level].store(node, AtomicOrd::Release);
            }
        }
    }

    /// True when an entry equal to `key` is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        let node = self.find_greater_or_equal(key, None);
        !node.is_null()
            && self.cmp.compare_entries(unsafe { &(*node).entry }, key) == Ordering::Equal
    }

    // --------------------------------------------------------------------------------------------
    // Raw positioning — used by the memtable iterator
    // --------------------------------------------------------------------------------------------

    /// First node, or null when empty.
    pub(crate) fn first(&self) -> *const Node {
        // SAFETY: `head` is always a valid node.
        unsafe { (*self.head).next(0) }
    }

    /// First node with entry ≥ `key`, or null.
    pub(crate) fn seek(&self, key: &[u8]) -> *const Node {
        self.find_greater_or_equal(key, None)
    }

    /// Last node with entry < `key`, or null when no such node exists.
    pub(crate) fn seek_before(&self, key: &[u8]) -> *const Node {
        let node = self.find_less_than(key);
        if node == self.head { ptr::null() } else { node }
    }

    /// Last node, or null when empty.
    pub(crate) fn last(&self) -> *const Node {
        let node = self.find_last();
        if node == self.head { ptr::null() } else { node }
    }

    /// Successor of `node` at level 0.
    ///
    /// # Safety
    ///
    /// `node` must point at a live node of this list.
    pub(crate) unsafe fn next_of(&self, node: *const Node) -> *const Node {
        unsafe { (*node).next(0) }
    }

    /// Predecessor of `node`, or null when `node` is the first entry.
    ///
    /// There are no backward links; this re-descends from the top, as
    /// reverse iteration is the rare path.
    ///
    /// # Safety
    ///
    /// `node` must point at a live node of this list.
    pub(crate) unsafe fn prev_of(&self, node: *const Node) -> *const Node {
        let entry = unsafe { &(*node).entry };
        self.seek_before(entry)
    }

    /// The entry bytes of `node`.
    ///
    /// # Safety
    ///
    /// `node` must point at a live node of this list, and the returned
    /// slice must not outlive the list (nodes are freed in `Drop`).
    pub(crate) unsafe fn entry_of<'a>(&self, node: *const Node) -> &'a [u8] {
        unsafe { &(*node).entry }
    }

    // --------------------------------------------------------------------------------------------
    // Internal descent
    // --------------------------------------------------------------------------------------------

    fn find_greater_or_equal(
        &self,
        key: &[u8],
        mut prev: Option<&mut [*mut Node; MAX_HEIGHT]>,
    ) -> *mut Node {
        let mut x = self.head;
        let mut level = self.height() - 1;
        loop {
            // SAFETY: `x` starts at head and only advances to published nodes.
            let nxt = unsafe { (*x).next(level) };
            let after_next = !nxt.is_null()
                && self.cmp.compare_entries(unsafe { &(*nxt).entry }, key) == Ordering::Less;
            if after_next {
                x = nxt;
            } else {
                if let Some(prev) = prev.as_deref_mut() {
                    prev[level] = x;
                }
                if level == 0 {
                    return nxt;
                }
                level -= 1;
            }
        }
    }

    fn find_less_than(&self, key: &[u8]) -> *mut Node {
        let mut x = self.head;
        let mut level = self.height() - 1;
        loop {
            // SAFETY: as in `find_greater_or_equal`.
            let nxt = unsafe { (*x).next(level) };
            let before_key = !nxt.is_null()
                && self.cmp.compare_entries(unsafe { &(*nxt).entry }, key) == Ordering::Less;
            if before_key {
                x = nxt;
            } else if level == 0 {
                return x;
            } else {
                level -= 1;
            }
        }
    }

    fn find_last(&self) -> *mut Node {
        let mut x = self.head;
        let mut level = self.height() - 1;
        loop {
            // SAFETY: as in `find_greater_or_equal`.
            let nxt = unsafe { (*x).next(level) };
            if !nxt.is_null() {
                x = nxt;
            } else if level == 0 {
                return x;
            } else {
                level -= 1;
            }
        }
    }
}

impl<C: EntryOrdering> Drop for SkipList<C> {
    fn drop(&mut self) {
        // Exclusive access here: walk level 0 and free every node.
        let mut node = unsafe { (*self.head).next_relaxed(0) };
        while !node.is_null() {
            let following = unsafe { (*node).next_relaxed(0) };
            drop(unsafe { Box::from_raw(node) });
            node = following;
        }
        drop(unsafe { Box::from_raw(self.head) });
    }
}
