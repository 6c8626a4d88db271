//! Per-key lock table backing single-flight loads.
//!
//! A fixed pool of shard guards serializes creation of per-key locks; the
//! locks themselves live in a keyed map and are single-permit semaphores.
//! Locks are only held while a value factory produces a value, and idle
//! locks are reclaimed after a sliding grace period so user-controlled key
//! strings cannot grow the table without bound.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use stratum_core::entry::mono_now_ms;

/// Grace period of disuse after which an idle lock is reclaimed.
const IDLE_GRACE: Duration = Duration::from_secs(300);

/// Acquisition failure: the lock was still held when the budget ran out.
#[derive(Debug)]
pub struct LockTimeout {
    /// The contended key.
    pub key: String,
    /// The budget that elapsed.
    pub waited: Duration,
}

/// One keyed exclusion primitive.
///
/// Non-reentrant; a single permit means at most one holder per key.
struct KeyLock {
    permit: Arc<Semaphore>,
    touched_ms: AtomicU64,
}

impl KeyLock {
    fn new() -> Self {
        KeyLock {
            permit: Arc::new(Semaphore::new(1)),
            touched_ms: AtomicU64::new(mono_now_ms()),
        }
    }

    fn touch(&self) {
        self.touched_ms.store(mono_now_ms(), Ordering::Relaxed);
    }

    fn idle_for_longer_than(&self, grace: Duration) -> bool {
        let touched = self.touched_ms.load(Ordering::Relaxed);
        mono_now_ms().saturating_sub(touched) > grace.as_millis() as u64
    }
}

/// Guard over a held per-key lock.
///
/// Dropping the guard releases the lock; release always succeeds.
#[derive(Debug)]
pub struct KeyLockGuard {
    _permit: OwnedSemaphorePermit,
}

/// Fixed-size pool of shard guards plus a keyed map of exclusion
/// primitives.
///
/// The fast path reads the keyed map without touching the shard guards;
/// the slow path takes the shard guard for the key, double-checks, and
/// installs a fresh primitive. Contention on one key never blocks lookups
/// for unrelated keys.
pub struct KeyLockTable {
    guards: Box<[Mutex<()>]>,
    locks: DashMap<String, Arc<KeyLock>>,
}

impl KeyLockTable {
    /// Creates a table with the given shard-guard pool size.
    pub fn new(pool_size: usize) -> Self {
        let guards = (0..pool_size.max(1)).map(|_| Mutex::new(())).collect();
        KeyLockTable {
            guards,
            locks: DashMap::new(),
        }
    }

    fn shard(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.guards.len() as u64) as usize
    }

    fn lock_for(&self, key: &str) -> Arc<KeyLock> {
        if let Some(lock) = self.locks.get(key) {
            lock.touch();
            return Arc::clone(&lock);
        }

        let guard = self.guards[self.shard(key)]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Double-check: another creator may have won the shard guard race.
        if let Some(lock) = self.locks.get(key) {
            lock.touch();
            return Arc::clone(&lock);
        }
        let lock = Arc::new(KeyLock::new());
        self.locks.insert(key.to_owned(), Arc::clone(&lock));
        drop(guard);
        lock
    }

    /// Acquires the lock for `key`, waiting up to `timeout`.
    ///
    /// Cancellation is dropping the returned future. A lock reclaimed
    /// between lookup and acquisition is transparently re-created.
    ///
    /// # Errors
    ///
    /// Returns [`LockTimeout`] when the budget elapses first.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<KeyLockGuard, LockTimeout> {
        let lock = self.lock_for(key);
        let acquired = tokio::time::timeout(timeout, Arc::clone(&lock.permit).acquire_owned()).await;
        match acquired {
            Ok(Ok(permit)) => {
                lock.touch();
                Ok(KeyLockGuard { _permit: permit })
            }
            // The semaphore is never closed; treat it like contention.
            Ok(Err(_)) | Err(_) => Err(LockTimeout {
                key: key.to_owned(),
                waited: timeout,
            }),
        }
    }

    /// Reclaims locks idle past the grace period.
    ///
    /// A lock is reclaimable only while the map holds the sole reference
    /// and the permit is free: holders and waiters both keep clones alive,
    /// so reclamation can never strand either. Runs from the cache's
    /// sweeper tick.
    pub fn reclaim_idle(&self) {
        self.reclaim_idle_after(IDLE_GRACE);
    }

    fn reclaim_idle_after(&self, grace: Duration) {
        let before = self.locks.len();
        self.locks.retain(|_, lock| {
            Arc::strong_count(lock) > 1
                || lock.permit.available_permits() == 0
                || !lock.idle_for_longer_than(grace)
        });
        let reclaimed = before.saturating_sub(self.locks.len());
        if reclaimed > 0 {
            trace!(reclaimed, "reclaimed idle key locks");
        }
    }

    /// Number of currently tracked per-key locks.
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }
}
