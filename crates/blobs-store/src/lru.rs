//! Fixed-capacity cache over a ring of slots.
//!
//! `next_evict` walks the ring; inserting always overwrites the slot under
//! it. A hit swaps the entry into that slot and advances past it, so recently
//! used entries sit furthest from eviction.

use std::collections::HashMap;
use std::hash::Hash;

struct Entry<V> {
    val: V,
    /// Slot currently holding this key.
    index: usize,
    /// Clock reading at insertion or last hit.
    touched: u64,
}

pub struct LruCache<K, V> {
    slots: Vec<Option<K>>,
    next_evict: usize,
    contents: HashMap<K, Entry<V>>,
    clock: u64,
    hits: u64,
    hit_age_total: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache with `capacity` slots.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LruCache capacity must be positive");
        Self {
            slots: vec![None; capacity],
            next_evict: 0,
            contents: HashMap::with_capacity(capacity),
            clock: 0,
            hits: 0,
            hit_age_total: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn has(&self, key: &K) -> bool {
        self.contents.contains_key(key)
    }

    /// Insert `val`, evicting whatever occupies the next slot.
    ///
    /// Re-adding a present key replaces its value in place.
    pub fn add(&mut self, key: K, val: V) {
        self.clock += 1;
        if let Some(entry) = self.contents.get_mut(&key) {
            entry.val = val;
            entry.touched = self.clock;
            return;
        }
        if let Some(evicted) = self.slots[self.next_evict].take() {
            self.contents.remove(&evicted);
        }
        self.slots[self.next_evict] = Some(key.clone());
        self.contents.insert(
            key,
            Entry {
                val,
                index: self.next_evict,
                touched: self.clock,
            },
        );
        self.advance();
    }

    /// Look up `key`, moving it to the most recently used position.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.clock += 1;
        let index = {
            let entry = self.contents.get_mut(key)?;
            self.hits += 1;
            self.hit_age_total += self.clock - entry.touched;
            entry.touched = self.clock;
            entry.index
        };
        self.swap(self.next_evict, index);
        self.advance();
        self.contents.get(key).map(|e| &e.val)
    }

    /// Average number of operations between an entry's previous use and
    /// a hit on it.
    pub fn mean_hit_age(&self) -> f64 {
        if self.hits == 0 {
            return 0.0;
        }
        self.hit_age_total as f64 / self.hits as f64
    }

    fn advance(&mut self) {
        self.next_evict = (self.next_evict + 1) % self.slots.len();
    }

    fn swap(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        self.slots.swap(i, j);
        for idx in [i, j] {
            if let Some(key) = &self.slots[idx] {
                if let Some(entry) = self.contents.get_mut(key) {
                    entry.index = idx;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_in_ring_order() {
        let mut lru = LruCache::new(2);
        lru.add("a", 1);
        lru.add("b", 2);
        lru.add("c", 3);

        assert!(!lru.has(&"a"));
        assert_eq!(lru.get(&"b"), Some(&2));
        assert_eq!(lru.get(&"c"), Some(&3));
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn test_hit_protects_entry() {
        let mut lru = LruCache::new(3);
        lru.add("a", 1);
        lru.add("b", 2);
        lru.add("c", 3);

        // "a" sat in the next slot to evict; the hit moves it out of the way.
        assert_eq!(lru.get(&"a"), Some(&1));
        lru.add("d", 4);

        assert!(lru.has(&"a"));
        assert!(lru.has(&"c"));
        assert!(lru.has(&"d"));
        assert!(!lru.has(&"b"));
    }

    #[test]
    fn test_readd_replaces_in_place() {
        let mut lru = LruCache::new(2);
        lru.add("a", 1);
        lru.add("a", 10);
        lru.add("b", 2);

        assert_eq!(lru.len(), 2);
        assert_eq!(lru.get(&"a"), Some(&10));
        assert_eq!(lru.get(&"b"), Some(&2));
    }

    #[test]
    fn test_mean_hit_age() {
        let mut lru = LruCache::new(4);
        assert_eq!(lru.mean_hit_age(), 0.0);
        lru.add("a", ());
        lru.add("b", ());
        lru.get(&"a");
        lru.get(&"a");
        assert_eq!(lru.mean_hit_age(), 1.5);
        assert!(lru.get(&"zz").is_none());
        assert_eq!(lru.mean_hit_age(), 1.5);
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_rejected() {
        let _ = LruCache::<u32, u32>::new(0);
    }
}
