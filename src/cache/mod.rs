//! # Sharded LRU Cache
//!
//! Charge-accounted LRU cache behind the table handle cache and the block
//! cache.  Keys hash to one of 16 shards, each independently locked, so
//! concurrent readers touching different shards never contend.
//!
//! ## Eviction and pinning
//!
//! Each entry carries a *charge* (bytes for blocks, a unit for table
//! handles).  When a shard's total charge exceeds its share of the
//! capacity, entries fall off the cold end of its recency list.  Values are
//! handed out as `Arc<V>`: eviction removes the cache's reference, and the
//! value's storage is released when the **last** outstanding handle drops.
//! Pinned entries (those with live handles) therefore survive eviction
//! safely — the cache never frees memory a reader still sees.
//!
//! Cache ids from [`ShardedCache::new_id`] let multiple users share one
//! cache by prefixing their keys.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const NUM_SHARD_BITS: u32 = 4;
const NUM_SHARDS: usize = 1 << NUM_SHARD_BITS;

// ------------------------------------------------------------------------------------------------
// Shard internals
// ------------------------------------------------------------------------------------------------

/// Slab slot holding one entry and its recency-list links.
struct Slot<K, V> {
    key: K,
    value: Arc<V>,
    charge: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

/// One shard: hash map into a slab, plus an intrusive recency list with the
/// most-recently-used entry at the head.
struct Shard<K, V> {
    capacity: usize,
    usage: usize,
    map: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> Shard<K, V> {
    fn new(capacity: usize) -> Shard<K, V> {
        Shard {
            capacity,
            usage: 0,
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn slot(&self, index: usize) -> &Slot<K, V> {
        self.slots[index].as_ref().expect("dangling cache slot")
    }

    fn slot_mut(&mut self, index: usize) -> &mut Slot<K, V> {
        self.slots[index].as_mut().expect("dangling cache slot")
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let slot = self.slot(index);
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slot_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slot_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, index: usize) {
        let old_head = self.head;
        {
            let slot = self.slot_mut(index);
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head {
            self.slot_mut(h).prev = Some(index);
        }
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    fn remove_slot(&mut self, index: usize) -> Slot<K, V> {
        self.unlink(index);
        let slot = self.slots[index].take().expect("dangling cache slot");
        self.free.push(index);
        self.usage -= slot.charge;
        self.map.remove(&slot.key);
        slot
    }

    fn lookup(&mut self, key: &K) -> Option<Arc<V>> {
        let index = *self.map.get(key)?;
        // Touch: move to the hot end.
        self.unlink(index);
        self.push_front(index);
        Some(Arc::clone(&self.slot(index).value))
    }

    fn insert(&mut self, key: K, value: Arc<V>, charge: usize) {
        if let Some(&existing) = self.map.get(&key) {
            self.remove_slot(existing);
        }

        let slot = Slot {
            key: key.clone(),
            value,
            charge,
            prev: None,
            next: None,
        };
        let index = match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(slot);
                i
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.map.insert(key, index);
        self.push_front(index);
        self.usage += charge;

        // Evict cold entries; the just-inserted entry is at the head and is
        // never evicted by its own insertion unless it alone exceeds the
        // capacity.
        while self.usage > self.capacity {
            let Some(tail) = self.tail else { break };
            if tail == index && self.map.len() == 1 {
                break;
            }
            self.remove_slot(tail);
        }
    }

    fn erase(&mut self, key: &K) {
        if let Some(&index) = self.map.get(key) {
            self.remove_slot(index);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// ShardedCache
// ------------------------------------------------------------------------------------------------

/// Thread-safe sharded LRU; see the module docs.
pub struct ShardedCache<K, V> {
    shards: Vec<Mutex<Shard<K, V>>>,
    last_id: AtomicU64,
}

impl<K: Hash + Eq + Clone, V> ShardedCache<K, V> {
    /// Cache with `capacity` total charge spread across the shards.
    pub fn new(capacity: usize) -> ShardedCache<K, V> {
        let per_shard = capacity.div_ceil(NUM_SHARDS);
        let shards = (0..NUM_SHARDS)
            .map(|_| Mutex::new(Shard::new(per_shard)))
            .collect();
        ShardedCache {
            shards,
            last_id: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        // Top bits select the shard, like the hash-prefix sharding of the
        // map itself uses the low bits.
        let shard = (hasher.finish() >> (64 - NUM_SHARD_BITS)) as usize;
        &self.shards[shard]
    }

    /// Insert, replacing any entry under the same key.
    pub fn insert(&self, key: K, value: Arc<V>, charge: usize) {
        self.shard_for(&key)
            .lock()
            .expect("cache shard poisoned")
            .insert(key, value, charge);
    }

    /// Fetch and touch.
    pub fn lookup(&self, key: &K) -> Option<Arc<V>> {
        self.shard_for(key)
            .lock()
            .expect("cache shard poisoned")
            .lookup(key)
    }

    /// Drop the cache's reference to `key`, if present.
    pub fn erase(&self, key: &K) {
        self.shard_for(key)
            .lock()
            .expect("cache shard poisoned")
            .erase(key);
    }

    /// A fresh id for key-prefix sharing of one cache between users.
    pub fn new_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Total charge currently accounted, across all shards.
    pub fn total_charge(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().expect("cache shard poisoned").usage)
            .sum()
    }
}
