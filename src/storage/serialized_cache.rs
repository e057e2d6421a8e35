//! Bounded in-memory cache of recently stored page bytes.
//!
//! Sits in front of the session data files: a page read right after it was
//! stored (the common back-button case) is answered without touching disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, SessionId};
use crate::pool::replacer::LruReplacer;

type CacheKey = (SessionId, PageId);

struct CacheState {
    pages: HashMap<CacheKey, Vec<u8>>,
    replacer: LruReplacer<CacheKey>,
}

/// LRU cache of serialized pages shared by all sessions.
///
/// Holds at most `capacity` pages; a capacity of zero turns every call into
/// a no-op. Entries must be dropped by the owner whenever the bytes on disk
/// stop being valid (window evicted, page removed, session unbound).
pub struct SerializedPageCache {
    capacity: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SerializedPageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState {
                pages: HashMap::new(),
                replacer: LruReplacer::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached bytes for a page, marking it most recently used.
    pub fn get(&self, session: &SessionId, page_id: PageId) -> Option<Vec<u8>> {
        if self.capacity == 0 {
            return None;
        }

        let key = (session.clone(), page_id);
        let mut state = self.state.lock();
        match state.pages.get(&key).cloned() {
            Some(bytes) => {
                state.replacer.record_access(&key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(bytes)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache the bytes just stored for a page, evicting the least recently
    /// used entry when full.
    pub fn store(&self, session: &SessionId, page_id: PageId, data: &[u8]) {
        if self.capacity == 0 {
            return;
        }

        let key = (session.clone(), page_id);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if !state.pages.contains_key(&key) && state.pages.len() >= self.capacity {
            if let Some(victim) = state.replacer.evict() {
                state.pages.remove(&victim);
            }
        }
        state.pages.insert(key.clone(), data.to_vec());
        state.replacer.record_access(&key);
        state.replacer.set_evictable(&key, true);
    }

    pub fn remove(&self, session: &SessionId, page_id: PageId) {
        if self.capacity == 0 {
            return;
        }

        let key = (session.clone(), page_id);
        let mut state = self.state.lock();
        if state.pages.remove(&key).is_some() {
            state.replacer.remove(&key);
        }
    }

    /// Drop every cached page of a session.
    pub fn remove_session(&self, session: &SessionId) {
        if self.capacity == 0 {
            return;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let doomed: Vec<CacheKey> = state
            .pages
            .keys()
            .filter(|(sid, _)| sid == session)
            .cloned()
            .collect();
        for key in doomed {
            state.pages.remove(&key);
            state.replacer.remove(&key);
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.pages.clear();
        state.replacer = LruReplacer::new();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(id: &str) -> SessionId {
        SessionId::new(id)
    }

    #[test]
    fn test_store_and_get() {
        let cache = SerializedPageCache::new(4);
        cache.store(&sid("s"), PageId::new(1), b"one");

        assert_eq!(cache.get(&sid("s"), PageId::new(1)).unwrap(), b"one");
        assert_eq!(cache.get(&sid("t"), PageId::new(1)), None);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_bounded_lru() {
        let cache = SerializedPageCache::new(2);
        cache.store(&sid("s"), PageId::new(1), b"1");
        cache.store(&sid("s"), PageId::new(2), b"2");

        // Touch 1 so that 2 becomes the eviction victim.
        cache.get(&sid("s"), PageId::new(1));
        cache.store(&sid("s"), PageId::new(3), b"3");

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&sid("s"), PageId::new(1)).is_some());
        assert!(cache.get(&sid("s"), PageId::new(2)).is_none());
        assert!(cache.get(&sid("s"), PageId::new(3)).is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = SerializedPageCache::new(2);
        cache.store(&sid("s"), PageId::new(1), b"old");
        cache.store(&sid("s"), PageId::new(2), b"2");
        cache.store(&sid("s"), PageId::new(1), b"new");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&sid("s"), PageId::new(1)).unwrap(), b"new");
        assert!(cache.get(&sid("s"), PageId::new(2)).is_some());
    }

    #[test]
    fn test_remove_and_remove_session() {
        let cache = SerializedPageCache::new(8);
        cache.store(&sid("a"), PageId::new(1), b"a1");
        cache.store(&sid("a"), PageId::new(2), b"a2");
        cache.store(&sid("b"), PageId::new(1), b"b1");

        cache.remove(&sid("a"), PageId::new(1));
        assert!(cache.get(&sid("a"), PageId::new(1)).is_none());

        cache.remove_session(&sid("a"));
        assert!(cache.get(&sid("a"), PageId::new(2)).is_none());
        assert_eq!(cache.get(&sid("b"), PageId::new(1)).unwrap(), b"b1");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = SerializedPageCache::new(0);
        cache.store(&sid("s"), PageId::new(1), b"one");

        assert!(cache.is_empty());
        assert_eq!(cache.get(&sid("s"), PageId::new(1)), None);
    }
}
