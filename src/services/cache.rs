use std::hash::Hash;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use tracing::debug;

use crate::config::DEFAULT_MAX_CACHE_SIZE;
use crate::error::lock_recover;
use crate::state::FormState;
use crate::value::FormValue;

/// Value lookups are keyed by path and the tree revision they were read from.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ValueKey {
    pub path: String,
    pub revision: u64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub value_entries: usize,
    pub form_state_entries: usize,
}

pub trait StateCache: Send + Sync {
    fn value(&self, key: &ValueKey) -> Option<FormValue>;
    fn store_value(&self, key: ValueKey, value: FormValue);
    fn form_state(&self, hash: u64) -> Option<Arc<FormState>>;
    fn store_form_state(&self, hash: u64, state: Arc<FormState>);
    /// Drops every entry of both caches.
    fn invalidate(&self);
    fn set_max_size(&self, max_size: usize);
    fn stats(&self) -> CacheStats;
}

/// Insertion-ordered map with a size bound. Overflowing the bound evicts the
/// oldest half of the entries in one step.
#[derive(Clone, Debug)]
pub struct BoundedCache<K, V> {
    entries: IndexMap<K, V>,
    max_size: usize,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash,
{
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            max_size: max_size.max(1),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Returns how many entries were evicted to make room.
    pub fn insert(&mut self, key: K, value: V) -> usize {
        self.entries.insert(key, value);
        self.enforce_bound()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn set_max_size(&mut self, max_size: usize) -> usize {
        self.max_size = max_size.max(1);
        self.enforce_bound()
    }

    fn enforce_bound(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.max_size {
            let count = (self.max_size / 2).max(1).min(self.entries.len());
            self.entries.drain(..count);
            evicted += count;
        }
        evicted
    }
}

struct CacheState {
    values: BoundedCache<ValueKey, FormValue>,
    form_states: BoundedCache<u64, Arc<FormState>>,
    stats: CacheStats,
}

impl CacheState {
    fn record(&mut self, hit: bool) {
        if hit {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
    }
}

#[derive(Clone)]
pub struct CacheService {
    state: Arc<Mutex<CacheState>>,
}

impl CacheService {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                values: BoundedCache::new(max_size),
                form_states: BoundedCache::new(max_size),
                stats: CacheStats::default(),
            })),
        }
    }
}

impl Default for CacheService {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CACHE_SIZE)
    }
}

impl StateCache for CacheService {
    fn value(&self, key: &ValueKey) -> Option<FormValue> {
        let mut state = lock_recover(&self.state);
        let found = state.values.get(key).cloned();
        state.record(found.is_some());
        found
    }

    fn store_value(&self, key: ValueKey, value: FormValue) {
        let mut state = lock_recover(&self.state);
        let evicted = state.values.insert(key, value);
        if evicted > 0 {
            state.stats.evictions += evicted as u64;
            debug!(evicted, "value cache evicted oldest entries");
        }
    }

    fn form_state(&self, hash: u64) -> Option<Arc<FormState>> {
        let mut state = lock_recover(&self.state);
        let found = state.form_states.get(&hash).cloned();
        state.record(found.is_some());
        found
    }

    fn store_form_state(&self, hash: u64, snapshot: Arc<FormState>) {
        let mut state = lock_recover(&self.state);
        let evicted = state.form_states.insert(hash, snapshot);
        if evicted > 0 {
            state.stats.evictions += evicted as u64;
            debug!(evicted, "form state cache evicted oldest entries");
        }
    }

    fn invalidate(&self) {
        let mut state = lock_recover(&self.state);
        state.values.clear();
        state.form_states.clear();
    }

    fn set_max_size(&self, max_size: usize) {
        let mut state = lock_recover(&self.state);
        let evicted =
            state.values.set_max_size(max_size) + state.form_states.set_max_size(max_size);
        state.stats.evictions += evicted as u64;
    }

    fn stats(&self) -> CacheStats {
        let state = lock_recover(&self.state);
        CacheStats {
            value_entries: state.values.len(),
            form_state_entries: state.form_states.len(),
            ..state.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> ValueKey {
        ValueKey {
            path: path.to_string(),
            revision: 0,
        }
    }

    #[test]
    fn overflow_evicts_oldest_half_together() {
        let mut cache = BoundedCache::new(10);
        for index in 0..10 {
            assert_eq!(cache.insert(index, index), 0);
        }
        assert_eq!(cache.insert(10, 10), 5);
        assert_eq!(cache.len(), 6);
        assert!((0..5).all(|index| !cache.contains_key(&index)));
        assert!((5..=10).all(|index| cache.contains_key(&index)));
    }

    #[test]
    fn never_exceeds_bound() {
        for max in [1_usize, 2, 3, 7, 16] {
            let mut cache = BoundedCache::new(max);
            for index in 0..(max * 5 + 1) {
                cache.insert(index, ());
                assert!(cache.len() <= max, "max {max} exceeded at {index}");
            }
        }
    }

    #[test]
    fn reinserting_keeps_original_position() {
        let mut cache = BoundedCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 3);
        cache.insert("c", 4);
        assert!(!cache.contains_key(&"a"));
        assert_eq!(cache.get(&"b"), Some(&2));
    }

    #[test]
    fn service_tracks_hits_and_bound() {
        let cache = CacheService::new(4);
        assert_eq!(cache.value(&key("a")), None);
        cache.store_value(key("a"), FormValue::from(1));
        assert_eq!(cache.value(&key("a")), Some(FormValue::from(1)));

        for path in ["b", "c", "d", "e"] {
            cache.store_value(key(path), FormValue::Null);
        }
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.value_entries, 3);
        assert_eq!(cache.value(&key("a")), None);
    }

    #[test]
    fn invalidate_clears_both_caches() {
        let cache = CacheService::default();
        cache.store_value(key("a"), FormValue::from(true));
        cache.store_form_state(
            7,
            Arc::new(FormState {
                values: FormValue::Null,
                errors: Default::default(),
                touched: Vec::new(),
                active: None,
                submitting: false,
                valid: true,
                dirty: false,
                pristine: true,
            }),
        );
        cache.invalidate();
        let stats = cache.stats();
        assert_eq!(stats.value_entries, 0);
        assert_eq!(stats.form_state_entries, 0);
    }
}
