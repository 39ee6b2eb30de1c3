//! TTL map with single-flight loading
//!
//! Entries live in a `DashMap` and expire `ttl` after insertion. Loads go
//! through a per-key slot so concurrent readers of a missing entry run the
//! loader once; slots are dropped as soon as no waiter holds them, including
//! when a loader panics. Expired entries are swept on every insert.

use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rustc_hash::FxHashMap;

use crate::Result;

/// Observable lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Never loaded, or invalidated.
    Missing,
    /// A loader is running for this key.
    Computing,
    /// Fresh value, valid for `remaining`.
    Cached {
        /// Time left before expiry.
        remaining: Duration,
    },
    /// Value present but past its TTL; the next read reloads it.
    Expired,
}

#[derive(Debug)]
struct Entry<V> {
    value: Arc<V>,
    inserted: Instant,
}

type Slot = Arc<Mutex<()>>;

/// Releases an in-flight slot when the loading caller leaves, however it leaves.
struct SlotGuard<'a, K, V>
where
    K: Eq + Hash + Clone,
{
    cache: &'a TtlCache<K, V>,
    key: &'a K,
    slot: Slot,
}

impl<K, V> Drop for SlotGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        self.cache.release_slot(self.key, &self.slot);
    }
}

/// Concurrent map whose entries expire after a fixed TTL.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    entries: DashMap<K, Entry<V>>,
    in_flight: Mutex<FxHashMap<K, Slot>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Empty cache with the given entry lifetime.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: Mutex::new(FxHashMap::default()),
            ttl,
        }
    }

    /// Entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The value under `key` if it has not expired.
    #[must_use]
    pub fn get_fresh(&self, key: &K) -> Option<Arc<V>> {
        self.entries
            .get(key)
            .filter(|entry| entry.inserted.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Insert or replace `key` with a fresh TTL, dropping expired entries.
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        self.sweep_expired();
        let value = Arc::new(value);
        self.entries.insert(
            key,
            Entry {
                value: Arc::clone(&value),
                inserted: Instant::now(),
            },
        );
        value
    }

    /// Return the fresh value under `key`, or run `load` once and cache an
    /// `Ok(Some(_))` result.
    ///
    /// Concurrent callers for the same key wait for the first loader and then
    /// see its value. `Ok(None)` and errors are not cached.
    ///
    /// # Errors
    ///
    /// Returns whatever `load` returns.
    pub fn get_or_try_load<F>(&self, key: &K, load: F) -> Result<Option<Arc<V>>>
    where
        F: FnOnce() -> Result<Option<V>>,
    {
        if let Some(value) = self.get_fresh(key) {
            return Ok(Some(value));
        }

        let guard = SlotGuard {
            cache: self,
            key,
            slot: self.acquire_slot(key),
        };
        let _loading = lock(&guard.slot);
        // Another caller may have finished while we waited
        if let Some(value) = self.get_fresh(key) {
            return Ok(Some(value));
        }
        Ok(load()?.map(|value| self.insert(key.clone(), value)))
    }

    /// Drop every entry past its TTL.
    pub fn sweep_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.inserted.elapsed() < ttl);
    }

    /// Lifecycle state of `key`.
    #[must_use]
    pub fn state(&self, key: &K) -> CacheState {
        let loading = lock(&self.in_flight)
            .get(key)
            .is_some_and(|slot| slot.try_lock().is_err());
        if loading {
            return CacheState::Computing;
        }
        match self.entries.get(key) {
            None => CacheState::Missing,
            Some(entry) => {
                let age = entry.inserted.elapsed();
                if age < self.ttl {
                    CacheState::Cached {
                        remaining: self.ttl - age,
                    }
                } else {
                    CacheState::Expired
                }
            }
        }
    }

    /// Drop `key`. Returns `true` if it was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Keep only keys for which `keep` returns `true`.
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        self.entries.retain(|key, _| keep(key));
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn acquire_slot(&self, key: &K) -> Slot {
        Arc::clone(lock(&self.in_flight).entry(key.clone()).or_default())
    }

    fn release_slot(&self, key: &K, slot: &Slot) {
        let mut in_flight = lock(&self.in_flight);
        // One reference in the map, one held by us: nobody else is waiting
        let last = in_flight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
        if last {
            in_flight.remove(key);
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

/// The guarded data is either `()` or a map that every critical section
/// leaves consistent, so a poisoned lock is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_loads_once_then_serves_cached() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        let key = "a".to_string();

        for _ in 0..3 {
            let value = cache
                .get_or_try_load(&key, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(7))
                })
                .unwrap();
            assert_eq!(value.as_deref(), Some(&7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(cache.state(&key), CacheState::Cached { .. }));
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[test]
    fn test_concurrent_readers_share_one_load() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let value = cache
                        .get_or_try_load(&1, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(Some(42))
                        })
                        .unwrap();
                    assert_eq!(value.as_deref(), Some(&42));
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[test]
    fn test_none_and_errors_are_not_cached() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.get_or_try_load(&1, || Ok(None)).unwrap(), None);
        assert!(cache
            .get_or_try_load(&1, || Err(Error::Other("boom".to_string())))
            .is_err());
        assert_eq!(cache.state(&1), CacheState::Missing);
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::ZERO);
        cache.insert(1, 10);
        assert_eq!(cache.state(&1), CacheState::Expired);
        assert!(cache.get_fresh(&1).is_none());

        let reloaded = cache.get_or_try_load(&1, || Ok(Some(11))).unwrap();
        assert_eq!(reloaded.as_deref(), Some(&11));
    }

    #[test]
    fn test_state_reports_computing() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60));
        let mut seen = CacheState::Missing;
        let _ = cache.get_or_try_load(&6, || {
            seen = cache.state(&6);
            Ok(Some(1))
        });
        assert_eq!(seen, CacheState::Computing);
    }

    #[test]
    fn test_insert_sweeps_expired_entries() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_millis(20));
        cache.insert(1, 10);
        cache.insert(2, 20);
        thread::sleep(Duration::from_millis(40));

        cache.insert(3, 30);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.state(&1), CacheState::Missing);
        assert!(matches!(cache.state(&3), CacheState::Cached { .. }));
    }

    #[test]
    fn test_panicking_loader_releases_slot() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cache.get_or_try_load(&4, || panic!("loader failed"))
        }));
        assert!(outcome.is_err());
        assert_eq!(cache.in_flight_len(), 0);
        assert_eq!(cache.state(&4), CacheState::Missing);

        let value = cache.get_or_try_load(&4, || Ok(Some(9))).unwrap();
        assert_eq!(value.as_deref(), Some(&9));
    }

    #[test]
    fn test_invalidate_and_retain() {
        let cache: TtlCache<(u32, u32), u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert((1, 1), 0);
        cache.insert((1, 2), 0);
        cache.insert((2, 1), 0);

        assert!(cache.invalidate(&(1, 1)));
        assert!(!cache.invalidate(&(1, 1)));
        cache.retain(|(a, _)| *a != 1);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
