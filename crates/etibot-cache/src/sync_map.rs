//! Mutex-guarded associative container.
//!
//! [`SyncMap`] is the storage primitive behind every cache in the client.
//! A single lock serializes every read and write, including the copies made
//! by [`keys`](SyncMap::keys), [`values`](SyncMap::values) and
//! [`snapshot`](SyncMap::snapshot). There is no per-bucket locking: heavy
//! contention on one map serializes all of its users. Compound operations
//! that must be atomic go through [`with_lock`](SyncMap::with_lock).

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::Mutex;

/// A `HashMap` behind one mutex.
pub struct SyncMap<K, V> {
    inner: Mutex<HashMap<K, V>>,
}

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash,
{
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a value, returning the previous one for the key.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.lock().insert(key, value)
    }

    /// Remove a key, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    /// Whether the key is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Keep only the entries for which `keep` returns `true`.
    pub fn retain(&self, keep: impl FnMut(&K, &mut V) -> bool) {
        self.inner.lock().retain(keep);
    }

    /// Run `f` with exclusive access to the underlying map.
    ///
    /// The lock is held for the whole call; `f` must not call back into
    /// this map.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut HashMap<K, V>) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Clone out the value for a key, if present.
    pub fn try_get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    /// Clone out the value for a key, or `V::default()` when absent.
    pub fn get_or_default(&self, key: &K) -> V
    where
        V: Default,
    {
        self.try_get(key).unwrap_or_default()
    }

    /// Return the existing value or insert the one produced by `make`.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        self.inner.lock().entry(key).or_insert_with(make).clone()
    }

    /// Copy of every key.
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().keys().cloned().collect()
    }

    /// Copy of every value.
    pub fn values(&self) -> Vec<V> {
        self.inner.lock().values().cloned().collect()
    }

    /// Copy of the whole map.
    pub fn snapshot(&self) -> HashMap<K, V> {
        self.inner.lock().clone()
    }
}

impl<K, V> Default for SyncMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for SyncMap<K, V>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.lock().iter()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn basic_operations() {
        let map: SyncMap<u32, String> = SyncMap::new();
        assert!(map.is_empty());
        assert_eq!(map.insert(1, "one".to_owned()), None);
        assert_eq!(map.insert(1, "uno".to_owned()), Some("one".to_owned()));
        assert!(map.contains_key(&1));
        assert_eq!(map.try_get(&1).as_deref(), Some("uno"));
        assert_eq!(map.try_get(&2), None);
        assert_eq!(map.get_or_default(&2), String::new());
        assert_eq!(map.remove(&1).as_deref(), Some("uno"));
        assert!(map.is_empty());
    }

    #[test]
    fn get_or_insert_with_keeps_existing() {
        let map: SyncMap<u32, u32> = SyncMap::new();
        assert_eq!(map.get_or_insert_with(7, || 1), 1);
        assert_eq!(map.get_or_insert_with(7, || 2), 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn snapshots_are_detached_copies() {
        let map: SyncMap<u32, u32> = SyncMap::new();
        map.insert(1, 10);
        map.insert(2, 20);
        let snap = map.snapshot();
        map.clear();
        assert_eq!(snap.len(), 2);
        assert!(map.is_empty());

        map.insert(3, 30);
        let mut keys = map.keys();
        keys.sort_unstable();
        assert_eq!(keys, vec![3]);
        assert_eq!(map.values(), vec![30]);
    }

    #[test]
    fn retain_and_with_lock() {
        let map: SyncMap<u32, u32> = SyncMap::new();
        for i in 0..10 {
            map.insert(i, i * 2);
        }
        map.retain(|k, _| k % 2 == 0);
        assert_eq!(map.len(), 5);

        let moved = map.with_lock(|inner| {
            let v = inner.remove(&4).unwrap();
            inner.insert(100, v);
            v
        });
        assert_eq!(moved, 8);
        assert_eq!(map.try_get(&100), Some(8));
        assert!(!map.contains_key(&4));
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let map: Arc<SyncMap<u32, u32>> = Arc::new(SyncMap::new());
        let handles: Vec<_> = (0..8_u32)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..250_u32 {
                        map.insert(t * 1000 + i, i);
                    }
                    // Each thread removes its own odd keys again.
                    for i in (1..250_u32).step_by(2) {
                        map.remove(&(t * 1000 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 8 * 125);
    }
}
