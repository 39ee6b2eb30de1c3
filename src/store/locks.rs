//! Per-key locking over a fixed pool of mutexes
//!
//! Keys map onto shards with `trueno::hash_key`, the same hash the trueno
//! stack uses for partitioning. The pool never grows, so there is no lock
//! table to guard and nothing to evict.

use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub(crate) struct LockPool {
    shards: Box<[Mutex<()>]>,
}

impl LockPool {
    pub(crate) fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.len()
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn shard_of(&self, key: &str) -> usize {
        (trueno::hash_key(key) % self.shards.len() as u64) as usize
    }

    /// Lock the shard owning `key`.
    ///
    /// The guarded value is `()`, so a poisoned shard is simply taken over.
    pub(crate) fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.shards[self.shard_of(key)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock every shard, lowest index first.
    pub(crate) fn lock_all(&self) -> Vec<MutexGuard<'_, ()>> {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_shard_is_stable() {
        let pool = LockPool::new(16);
        let key = "experiments/e1/summary";
        assert_eq!(pool.shard_of(key), pool.shard_of(key));
        assert!(pool.shard_of(key) < pool.len());
    }

    #[test]
    fn test_zero_shards_becomes_one() {
        let pool = LockPool::new(0);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.shard_of("anything"), 0);
    }

    #[test]
    fn test_lock_serializes_same_key() {
        let pool = Arc::new(LockPool::new(4));
        let counter = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let _guard = pool.lock("same-key");
                    counter.lock().unwrap().push(i);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.lock().unwrap().len(), 8);
    }

    #[test]
    fn test_lock_all_then_single() {
        let pool = LockPool::new(8);
        {
            let guards = pool.lock_all();
            assert_eq!(guards.len(), 8);
        }
        let _guard = pool.lock("k");
    }
}
