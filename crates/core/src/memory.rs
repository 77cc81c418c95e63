//! Cost-bounded in-memory LRU sitting above the persistent cache.
//!
//! Never the source of truth: entries may be evicted at any time and callers
//! fall through to the file store.

use lru::LruCache;
use parking_lot::Mutex;

use crate::keys::UniqueKey;

struct MemoryInner<V> {
    lru: LruCache<UniqueKey, (V, usize)>,
    cost_in_use: usize,
}

/// LRU keyed by unique key, evicting least recently used entries once the
/// summed cost exceeds `max_cost`.
pub struct MemoryCache<V> {
    inner: Mutex<MemoryInner<V>>,
    max_cost: usize,
    cost: fn(&V) -> usize,
}

impl<V: Clone> MemoryCache<V> {
    /// `cost` prices one entry, e.g. decoded pixel count or body length.
    pub fn new(max_cost: usize, cost: fn(&V) -> usize) -> Self {
        Self { inner: Mutex::new(MemoryInner { lru: LruCache::unbounded(), cost_in_use: 0 }), max_cost, cost }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().lru.get(key).map(|(value, _)| value.clone())
    }

    /// Insert or replace an entry. Entries costing more than the whole budget
    /// are not kept.
    pub fn insert(&self, key: UniqueKey, value: V) {
        let cost = (self.cost)(&value);
        let mut inner = self.inner.lock();

        if let Some((_, old_cost)) = inner.lru.pop(&key) {
            inner.cost_in_use -= old_cost;
        }
        if cost > self.max_cost {
            tracing::debug!(key = %key, cost, max_cost = self.max_cost, "entry exceeds memory budget");
            return;
        }

        inner.lru.put(key, (value, cost));
        inner.cost_in_use += cost;

        while inner.cost_in_use > self.max_cost {
            let Some((evicted, (_, evicted_cost))) = inner.lru.pop_lru() else {
                break;
            };
            inner.cost_in_use -= evicted_cost;
            tracing::trace!(key = %evicted, cost = evicted_cost, "evicted from memory cache");
        }
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let (value, cost) = inner.lru.pop(key)?;
        inner.cost_in_use -= cost;
        Some(value)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lru.clear();
        inner.cost_in_use = 0;
    }

    pub fn total_cost(&self) -> usize {
        self.inner.lock().cost_in_use
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
