//! LRU (Least-Recently-Used) replacement policy.
//!
//! Keyed by an arbitrary hashable id so the file handle pool can track
//! entries by path.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;

/// Evicts the least recently accessed entry among those marked evictable.
///
/// Every `record_access` stamps the key with a fresh logical timestamp.
/// Entries currently borrowed are kept out of eviction with
/// `set_evictable(key, false)`.
pub struct LruReplacer<K> {
    /// Logical clock, bumped on every access.
    clock: u64,

    /// Access order: timestamp -> key (front = least recently used).
    order: BTreeMap<u64, K>,

    /// Latest timestamp per key, for O(log n) reordering.
    stamps: HashMap<K, u64>,

    /// Keys that may currently be evicted.
    evictable: HashSet<K>,
}

impl<K: Hash + Eq + Clone> LruReplacer<K> {
    /// Create a new LRU replacer.
    pub fn new() -> Self {
        Self {
            clock: 0,
            order: BTreeMap::new(),
            stamps: HashMap::new(),
            evictable: HashSet::new(),
        }
    }

    /// Record that a key was used, moving it to the most-recent end.
    pub fn record_access(&mut self, key: &K) {
        self.clock += 1;
        if let Some(old) = self.stamps.insert(key.clone(), self.clock) {
            self.order.remove(&old);
        }
        self.order.insert(self.clock, key.clone());
    }

    /// Mark a key as evictable or pinned.
    pub fn set_evictable(&mut self, key: &K, evictable: bool) {
        if evictable {
            if self.stamps.contains_key(key) {
                self.evictable.insert(key.clone());
            }
        } else {
            self.evictable.remove(key);
        }
    }

    /// Select and forget the least recently used evictable key.
    ///
    /// Returns None if every tracked key is pinned.
    pub fn evict(&mut self) -> Option<K> {
        let (&stamp, key) = self
            .order
            .iter()
            .find(|(_, key)| self.evictable.contains(*key))?;
        let key = key.clone();

        self.order.remove(&stamp);
        self.stamps.remove(&key);
        self.evictable.remove(&key);
        Some(key)
    }

    /// Forget a key entirely.
    pub fn remove(&mut self, key: &K) {
        if let Some(stamp) = self.stamps.remove(key) {
            self.order.remove(&stamp);
        }
        self.evictable.remove(key);
    }

    /// Number of evictable keys.
    pub fn size(&self) -> usize {
        self.evictable.len()
    }

    /// Number of tracked keys, pinned or not.
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}

impl<K: Hash + Eq + Clone> Default for LruReplacer<K> {
    fn default() -> Self {
        Self::new()
    }
}
