//! The concurrent first-level store.
//!
//! A keyed map of [`CacheEntry`] values with atomic replacement, expired
//! entries treated as absent, pattern deletion over the live key set, and
//! a sweep pass that concurrent callers coalesce by dropping. The store
//! itself emits no events; the cache façade turns its return values into
//! listener events and backplane messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use stratum_core::{CacheEntry, EvictionPolicy, KeyPattern};

use crate::metrics;

/// Point-in-time statistics over the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatistics {
    /// Number of resident entries, expired stragglers included.
    pub count: usize,
    /// Sum of serialized payload sizes in bytes.
    ///
    /// Entries whose serialization has not completed yet contribute zero.
    pub size_bytes: usize,
    /// Read hits served since construction.
    pub hits: u64,
    /// Read misses since construction (absent, expired or mistyped).
    pub misses: u64,
}

/// Outcome of a guarded removal.
#[derive(Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// A live entry was removed; its fingerprint, when known, is carried
    /// for the resulting change event.
    RemovedLive(Option<String>),
    /// An expired straggler was removed.
    RemovedExpired,
    /// The guard matched and the entry was left in place.
    Skipped,
    /// No entry was present.
    Missing,
}

/// Concurrent map from key to current entry.
pub struct MemoryStore {
    entries: DashMap<String, Arc<CacheEntry>>,
    policy: EvictionPolicy,
    sweep_active: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store with the given eviction policy.
    pub fn new(policy: EvictionPolicy) -> Self {
        MemoryStore {
            entries: DashMap::new(),
            policy,
            sweep_active: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Atomically installs `entry`, returning the displaced predecessor.
    pub fn insert(&self, entry: Arc<CacheEntry>) -> Option<Arc<CacheEntry>> {
        self.entries.insert(entry.key().to_owned(), entry)
    }

    /// Returns the live entry for `key`.
    ///
    /// Expired entries read as absent; the sweeper reclaims them later.
    /// Under LRU a hit slides the entry's deadlines forward.
    pub fn get_entry(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let entry = match self.entries.get(key) {
            Some(entry) => Arc::clone(&entry),
            None => {
                self.record_miss();
                return None;
            }
        };
        if entry.is_expired() {
            self.record_miss();
            return None;
        }
        if self.policy == EvictionPolicy::Lru {
            entry.refresh();
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_hit();
        Some(entry)
    }

    /// Installs an entry rehydrated from the second level.
    ///
    /// Identical to [`insert`](Self::insert); named separately because
    /// rehydration must not look like a fresh write to the caller.
    pub fn install_rehydrated(&self, entry: Arc<CacheEntry>) {
        self.entries.insert(entry.key().to_owned(), entry);
    }

    /// Removes the entry under `key`, honoring an optional skip guard.
    ///
    /// The guard receives the entry's fingerprint (absent while
    /// serialization is pending); returning `true` leaves the entry in
    /// place. This is how backplane conflict avoidance works: a peer's
    /// removal whose fingerprint equals the local one is redundant, the
    /// local state already matches what the sender established.
    pub fn remove(
        &self,
        key: &str,
        skip_if: Option<&(dyn Fn(Option<&str>) -> bool + Sync)>,
    ) -> RemoveOutcome {
        let removed = self.entries.remove_if(key, |_, entry| match skip_if {
            Some(guard) => !guard(entry.fingerprint()),
            None => true,
        });
        match removed {
            Some((_, entry)) if !entry.is_expired() => {
                RemoveOutcome::RemovedLive(entry.fingerprint().map(str::to_owned))
            }
            Some(_) => RemoveOutcome::RemovedExpired,
            None if self.entries.contains_key(key) => RemoveOutcome::Skipped,
            None => RemoveOutcome::Missing,
        }
    }

    /// Removes every key matching `pattern`; returns the matched keys.
    ///
    /// Individual removals produce no events; the caller publishes one
    /// aggregated event for the pattern.
    pub fn remove_by_pattern(&self, pattern: &KeyPattern) -> Vec<String> {
        let matched: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| pattern.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for key in &matched {
            self.entries.remove(key);
        }
        debug!(pattern = %pattern, removed = matched.len(), "pattern removal");
        matched
    }

    /// Drains the map; returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let drained = self.entries.len();
        self.entries.clear();
        drained
    }

    /// Scans for expired entries and removes them.
    ///
    /// Overlapping sweeps coalesce: a scan that finds another one active
    /// simply drops. Returns the reclaimed entries so the caller can emit
    /// `Expire` events.
    pub fn evict_expired(&self) -> Vec<Arc<CacheEntry>> {
        if self
            .sweep_active
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Vec::new();
        }

        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired())
            .map(|entry| entry.key().clone())
            .collect();
        let mut reclaimed = Vec::with_capacity(expired.len());
        for key in expired {
            // Re-check under the removal: the entry may have been
            // replaced with a live one since the scan.
            if let Some((_, entry)) = self.entries.remove_if(&key, |_, entry| entry.is_expired()) {
                reclaimed.push(entry);
            }
        }

        self.sweep_active.store(false, Ordering::Release);
        metrics::record_sweeper_evictions(reclaimed.len() as u64);
        reclaimed
    }

    /// Current statistics.
    pub fn statistics(&self) -> CacheStatistics {
        let mut size_bytes = 0usize;
        let mut count = 0usize;
        for entry in self.entries.iter() {
            count += 1;
            size_bytes += entry.size_bytes();
        }
        CacheStatistics {
            count,
            size_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of the current key set.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_miss();
    }
}
