use core::hash::Hash;
use std::sync::{Mutex, MutexGuard};

use hashbrown::HashMap;

/// A bounded key-value store with least-recently-used eviction.
///
/// Lookups return `Option` rather than a reserved "not found" sentinel,
/// so the value domain is unrestricted. Every operation takes one lock
/// covering both the lookup table and the recency order; operations are
/// serialized across threads, not concurrent-reader-safe.
pub struct LruCache<K, V> {
    capacity: usize,
    state: Mutex<LruState<K, V>>,
}

struct LruState<K, V> {
    map: HashMap<K, V>,
    /// Keys ordered by recency; index 0 is the most recently used.
    recency: Vec<K>,
}

impl<K, V> LruCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be at least one");
        Self {
            capacity,
            state: Mutex::new(LruState {
                map: HashMap::with_capacity(capacity),
                recency: Vec::with_capacity(capacity),
            }),
        }
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.lock();
        let value = state.map.get(key)?.clone();
        Self::touch(&mut state.recency, key);
        Some(value)
    }

    /// Insert or replace the value under `key` and mark it most recently
    /// used. When a new key arrives at full capacity, the least recently
    /// used entry is evicted first and returned; at most one entry is
    /// evicted per insertion.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let mut state = self.lock();
        if state.map.contains_key(&key) {
            state.map.insert(key.clone(), value);
            Self::touch(&mut state.recency, &key);
            return None;
        }

        let evicted = if state.map.len() == self.capacity {
            state
                .recency
                .pop()
                .and_then(|oldest| state.map.remove(&oldest))
        } else {
            None
        };

        state.recency.insert(0, key.clone());
        state.map.insert(key, value);
        evicted
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries, fixed at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, LruState<K, V>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn touch(recency: &mut Vec<K>, key: &K) {
        if let Some(pos) = recency.iter().position(|k| k == key) {
            let k = recency.remove(pos);
            recency.insert(0, k);
        }
    }
}

impl<K, V> core::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserting_capacity_plus_one_evicts_the_oldest() {
        let cache = LruCache::new(3);
        for k in 1..=4 {
            cache.put(k, k * 10);
        }
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&4), Some(40));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn get_counts_as_a_use() {
        let cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        // Touch "a" so "b" becomes the eviction victim.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("c", 3);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn re_put_counts_as_a_use() {
        let cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        cache.put("c", 3);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn replacement_does_not_evict() {
        let cache = LruCache::new(2);
        cache.put(1, "one");
        cache.put(2, "two");
        assert!(cache.put(1, "uno").is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&2), Some("two"));
    }

    #[test]
    fn eviction_returns_the_victim() {
        let cache = LruCache::new(1);
        cache.put(1, "one");
        assert_eq!(cache.put(2, "two"), Some("one"));
    }

    #[test]
    #[should_panic(expected = "capacity must be at least one")]
    fn zero_capacity_is_rejected() {
        let _ = LruCache::<u32, u32>::new(0);
    }
}
