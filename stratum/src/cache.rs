//! The public cache façade.
//!
//! [`TieredCache`] wires the L1 store, the serialization pipeline, the
//! key-lock table, the backplane adapter and the L2 mirror together. It is
//! cheap to clone; all clones share one cache instance. Dropping the last
//! clone stops the background workers.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use stratum_backend::{Backplane, RemoteStore};
use stratum_core::{
    CacheConfig, CacheEntry, ConfigError, EntryEvent, EntryEventKind, KeyPattern,
    NotificationMode, Raw,
};

use crate::backplane::{BackplaneAdapter, drain_inbound};
use crate::error::{BoxError, CacheError};
use crate::lock::KeyLockTable;
use crate::mirror::RemoteMirror;
use crate::pipeline::{CompletionCallback, SerializationPipeline, process_entry};
use crate::store::{CacheStatistics, MemoryStore, RemoveOutcome};

/// A process-local cache kept coherent across a fleet through an
/// invalidation backplane, with an optional shared second level.
///
/// See the crate-level documentation for the data flow. All operations
/// are safe for concurrent use.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: CacheConfig,
    store: Arc<MemoryStore>,
    locks: KeyLockTable,
    pipeline: Option<SerializationPipeline>,
    on_complete: CompletionCallback,
    mirror: Option<Arc<RemoteMirror>>,
    backplane: Option<BackplaneAdapter>,
    workers: Vec<JoinHandle<()>>,
    stopped: AtomicBool,
}

impl TieredCache {
    /// Starts building a cache over the given configuration.
    pub fn builder(config: CacheConfig) -> TieredCacheBuilder {
        TieredCacheBuilder {
            config,
            remote_store: None,
            backplane: None,
        }
    }

    /// Returns the value stored under `key`, if a live entry of the
    /// requested type exists.
    ///
    /// A hit under the LRU policy slides the entry's deadlines forward.
    /// Expired entries read as absent, as do entries holding a different
    /// type. On a miss with the second level enabled, the remote store is
    /// consulted and a hit is rehydrated into L1 without firing change
    /// events.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        if let Some(entry) = self.inner.store.get_entry(key) {
            return entry.typed::<T>().map(|value| (*value).clone());
        }
        self.read_through::<T>(key).await
    }

    /// Stores `value` under `key`.
    ///
    /// The entry is visible to readers immediately. Serialization,
    /// fingerprinting, change events and the L2 mirror follow per the
    /// configured notification mode; none of them block this call beyond
    /// an inline serialize under [`NotificationMode::Sync`].
    pub async fn set<T>(&self, key: &str, value: T, ttl: Option<Duration>)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        let entry = Arc::new(CacheEntry::new(key, value, ttl));
        self.inner.store.insert(Arc::clone(&entry));

        match self.inner.config.notification_mode {
            NotificationMode::Async => {
                if let Some(pipeline) = &self.inner.pipeline {
                    pipeline.enqueue(entry);
                }
            }
            NotificationMode::Sync => {
                process_entry(
                    entry,
                    self.inner.config.compression_threshold,
                    &self.inner.on_complete,
                );
            }
            NotificationMode::None => {}
        }
    }

    /// Returns the cached value or produces it with `factory` under a
    /// per-key lock.
    ///
    /// At most one factory runs per key at any instant. A caller that
    /// cannot acquire the lock within `max_wait` (default: the configured
    /// factory wait budget) fails with
    /// [`CacheError::FactoryLockTimeout`]; the in-flight factory is
    /// unaffected. A factory error propagates unchanged and installs
    /// nothing.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
        max_wait: Option<Duration>,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        if let Some(value) = self.get::<T>(key).await {
            return Ok(value);
        }

        let wait = max_wait.unwrap_or(self.inner.config.max_factory_wait);
        let guard = self
            .inner
            .locks
            .acquire(key, wait)
            .await
            .map_err(|timeout| CacheError::FactoryLockTimeout {
                key: timeout.key,
                waited: timeout.waited,
            })?;

        // Another holder may have filled the entry while we waited.
        if let Some(value) = self.get::<T>(key).await {
            return Ok(value);
        }

        let value = factory(key.to_owned()).await.map_err(CacheError::Factory)?;
        self.set(key, value.clone(), ttl).await;
        drop(guard);
        Ok(value)
    }

    /// Batch variant of [`get_or_load`](Self::get_or_load).
    ///
    /// Partitions `keys` into hits and misses, serves misses from the
    /// second level with a single MGET when enabled, invokes
    /// `batch_factory` once with the remaining miss keys, and returns
    /// values aligned to the input order. The factory must return one
    /// value per miss key, in order.
    ///
    /// This path holds no per-key locks around the factory: two
    /// overlapping batches may invoke their factories for the same key
    /// twice. That trade favors throughput; last write wins.
    pub async fn get_or_load_batch<T, F, Fut>(
        &self,
        keys: &[String],
        batch_factory: F,
        ttl: Option<Duration>,
    ) -> Result<Vec<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, BoxError>>,
    {
        let mut results: Vec<Option<T>> = vec![None; keys.len()];
        let mut miss_idx: Vec<usize> = Vec::new();

        for (i, key) in keys.iter().enumerate() {
            match self.inner.store.get_entry(key) {
                Some(entry) => match entry.typed::<T>() {
                    Some(value) => results[i] = Some((*value).clone()),
                    None => miss_idx.push(i),
                },
                None => miss_idx.push(i),
            }
        }

        if let Some(mirror) = &self.inner.mirror
            && !miss_idx.is_empty()
        {
            let miss_keys: Vec<String> = miss_idx.iter().map(|&i| keys[i].clone()).collect();
            let found = mirror.read_through_many(&miss_keys).await;
            let mut still_missing = Vec::with_capacity(miss_idx.len());
            for (slot, bytes) in miss_idx.into_iter().zip(found) {
                match bytes {
                    Some(bytes) => match self.rehydrate::<T>(&keys[slot], &bytes) {
                        Some(value) => results[slot] = Some(value),
                        None => still_missing.push(slot),
                    },
                    None => still_missing.push(slot),
                }
            }
            miss_idx = still_missing;
        }

        if !miss_idx.is_empty() {
            let miss_keys: Vec<String> = miss_idx.iter().map(|&i| keys[i].clone()).collect();
            let values = batch_factory(miss_keys).await.map_err(CacheError::Factory)?;
            if values.len() != miss_idx.len() {
                return Err(CacheError::Factory(
                    format!(
                        "batch factory returned {} values for {} keys",
                        values.len(),
                        miss_idx.len()
                    )
                    .into(),
                ));
            }
            for (slot, value) in miss_idx.into_iter().zip(values) {
                self.set(&keys[slot], value.clone(), ttl).await;
                results[slot] = Some(value);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// Removes the entry under `key`; returns whether a live entry was
    /// removed.
    ///
    /// The remote copy is deleted regardless of local residency: the key
    /// may live in the second level without being resident in this L1.
    pub async fn remove(&self, key: &str) -> bool {
        let outcome = self.inner.store.remove(key, None);
        let live = if let RemoveOutcome::RemovedLive(fingerprint) = outcome {
            self.inner
                .emit_event(EntryEvent::new(key, EntryEventKind::Remove, fingerprint));
            true
        } else {
            false
        };

        if let Some(mirror) = &self.inner.mirror {
            let mirror = Arc::clone(mirror);
            let keys = vec![key.to_owned()];
            tokio::spawn(async move { mirror.mirror_remove(&keys).await });
        }
        live
    }

    /// Removes every key matching `pattern` (`*` is the only
    /// metacharacter; a leading `*` unanchors the match).
    ///
    /// Matched keys are removed without individual events; one aggregated
    /// removal event carries the pattern itself. The second level runs
    /// the same pattern server-side.
    pub async fn remove_by_pattern(&self, pattern: &str) {
        let compiled = KeyPattern::compile(pattern);
        self.inner.store.remove_by_pattern(&compiled);
        self.inner.emit_event(EntryEvent::pattern_remove(pattern));

        if let Some(mirror) = &self.inner.mirror {
            let mirror = Arc::clone(mirror);
            let pattern = pattern.to_owned();
            tokio::spawn(async move { mirror.mirror_remove_pattern(&pattern).await });
        }
    }

    /// Drains the cache; peers and the second level drop the namespace
    /// with an aggregated `"*"` removal.
    pub async fn clear(&self) {
        let drained = self.inner.store.clear();
        debug!(drained, "cache cleared");
        self.inner.emit_event(EntryEvent::pattern_remove("*"));

        if let Some(mirror) = &self.inner.mirror {
            let mirror = Arc::clone(mirror);
            tokio::spawn(async move { mirror.mirror_remove_pattern("*").await });
        }
    }

    /// Runs one expiration sweep now, in addition to the periodic one.
    pub async fn evict_expired(&self) {
        self.inner.sweep();
    }

    /// Point-in-time statistics: entry count, serialized bytes, hit and
    /// miss counters.
    pub async fn statistics(&self) -> CacheStatistics {
        self.inner.store.statistics()
    }

    /// Stops the background workers (sweeper, pipeline, subscription).
    ///
    /// Idempotent. The L1 keeps serving reads and writes afterwards, but
    /// nothing is serialized, mirrored or invalidated any more.
    pub fn shutdown(&self) {
        self.inner.stop();
    }

    /// This instance's identity on the backplane.
    pub fn instance_id(&self) -> &str {
        &self.inner.config.instance_id
    }

    async fn read_through<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let mirror = self.inner.mirror.as_ref()?;
        let bytes = mirror.read_through(key).await?;
        self.rehydrate::<T>(key, &bytes)
    }

    /// Rebuilds an entry from envelope bytes and installs it silently.
    fn rehydrate<T>(&self, key: &str, bytes: &[u8]) -> Option<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        match CacheEntry::from_envelope_bytes::<T>(bytes) {
            Ok(entry) if !entry.is_expired() => {
                let entry = Arc::new(entry);
                self.inner.store.install_rehydrated(Arc::clone(&entry));
                entry.typed::<T>().map(|value| (*value).clone())
            }
            Ok(_) => None,
            Err(error) => {
                warn!(key, %error, "corrupt envelope from second level; treating as miss");
                None
            }
        }
    }
}

impl CacheInner {
    /// Invoked by the serialization pipeline (or inline under `Sync`)
    /// once an entry's envelope exists.
    fn complete_write(&self, entry: Arc<CacheEntry>, envelope: Raw) {
        let event = EntryEvent::new(
            entry.key(),
            EntryEventKind::AddOrUpdate,
            entry.fingerprint().map(str::to_owned),
        );
        self.emit_event(event);

        if let Some(mirror) = &self.mirror {
            let mirror = Arc::clone(mirror);
            tokio::spawn(async move { mirror.mirror_write(&entry, envelope).await });
        }
    }

    /// Hands an event to the listener and the backplane.
    ///
    /// `NotificationMode::None` turns the whole notification machinery
    /// off; `Expire` events stay local because every peer expires its own
    /// copy on its own clock.
    fn emit_event(&self, event: EntryEvent) {
        if self.config.notification_mode == NotificationMode::None {
            return;
        }
        if let Some(listener) = &self.config.value_change_listener {
            listener(&event);
        }
        if event.kind != EntryEventKind::Expire
            && let Some(adapter) = &self.backplane
        {
            adapter.publish_event(&event);
        }
    }

    fn sweep(&self) {
        let reclaimed = self.store.evict_expired();
        for entry in &reclaimed {
            self.emit_event(EntryEvent::new(
                entry.key(),
                EntryEventKind::Expire,
                entry.fingerprint().map(str::to_owned),
            ));
        }
        self.locks.reclaim_idle();
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(pipeline) = &self.pipeline {
            pipeline.shutdown();
        }
        for worker in &self.workers {
            worker.abort();
        }
        debug!(
            instance_id = %self.config.instance_id,
            "cache workers stopped"
        );
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builder wiring optional backends onto a [`TieredCache`].
pub struct TieredCacheBuilder {
    config: CacheConfig,
    remote_store: Option<Arc<dyn RemoteStore>>,
    backplane: Option<Arc<dyn Backplane>>,
}

impl TieredCacheBuilder {
    /// Attaches the remote store used as the second level.
    ///
    /// Takes effect only when the configuration enables
    /// `use_remote_as_second_level`.
    pub fn remote_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.remote_store = Some(store);
        self
    }

    /// Attaches the invalidation backplane.
    pub fn backplane(mut self, bus: Arc<dyn Backplane>) -> Self {
        self.backplane = Some(bus);
        self
    }

    /// Validates the wiring, subscribes to the backplane and spawns the
    /// background workers.
    ///
    /// # Errors
    ///
    /// [`CacheError::Config`] when the second level is enabled without a
    /// remote store; [`CacheError::Backend`] when the backplane
    /// subscription fails.
    pub async fn build(self) -> Result<TieredCache, CacheError> {
        let config = self.config;
        let prefix = config.application_cache_prefix.clone();
        let instance_id = config.instance_id.clone();

        let mirror = match (&self.remote_store, config.use_remote_as_second_level) {
            (Some(store), true) => Some(Arc::new(RemoteMirror::new(
                Arc::clone(store),
                prefix.clone(),
            ))),
            (Some(_), false) => {
                debug!("remote store attached but second level disabled; ignoring it");
                None
            }
            (None, true) => return Err(ConfigError::MissingRemoteStore.into()),
            (None, false) => None,
        };

        // Subscribe before construction so a dead transport fails the
        // build instead of silently degrading.
        let inbound = match &self.backplane {
            Some(bus) => Some(bus.subscribe(&prefix).await?),
            None => None,
        };

        let store = Arc::new(MemoryStore::new(config.eviction_policy));

        let inner = Arc::new_cyclic(|weak: &Weak<CacheInner>| {
            let on_complete: CompletionCallback = {
                let weak = weak.clone();
                Arc::new(move |entry, envelope| {
                    if let Some(inner) = weak.upgrade() {
                        inner.complete_write(entry, envelope);
                    }
                })
            };

            let pipeline = (config.notification_mode == NotificationMode::Async).then(|| {
                SerializationPipeline::spawn(
                    config.flush_interval,
                    config.batch_size,
                    config.compression_threshold,
                    Arc::clone(&on_complete),
                )
            });

            let backplane = self
                .backplane
                .as_ref()
                .map(|bus| BackplaneAdapter::new(Arc::clone(bus), prefix.clone(), instance_id.clone()));

            let mut workers = Vec::new();
            workers.push(tokio::spawn(run_sweeper(
                weak.clone(),
                config.cleanup_interval,
            )));
            if let Some(stream) = inbound {
                workers.push(tokio::spawn(drain_inbound(
                    stream,
                    prefix.clone(),
                    instance_id.clone(),
                    Arc::clone(&store),
                )));
            }

            CacheInner {
                locks: KeyLockTable::new(config.lock_pool_size),
                store: Arc::clone(&store),
                config,
                pipeline,
                on_complete,
                mirror,
                backplane,
                workers,
                stopped: AtomicBool::new(false),
            }
        });

        Ok(TieredCache { inner })
    }
}

/// Periodic expiration sweep plus key-lock reclamation.
///
/// Holds only a weak handle so the sweeper never keeps a dropped cache
/// alive; it exits once the cache is gone.
async fn run_sweeper(inner: Weak<CacheInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a fresh interval fires immediately; skip it.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match inner.upgrade() {
            Some(inner) => inner.sweep(),
            None => return,
        }
    }
}
