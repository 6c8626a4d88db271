//! In-process test doubles for the remote store and the backplane.
//!
//! `MemoryRemoteStore` is a `DashMap`-backed stand-in for the shared KV
//! store; `LocalBus` fans invalidation messages out over a broadcast
//! channel. Together they let multi-instance coherence scenarios run
//! without a live Redis.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;

use stratum::{
    Backplane, CacheConfig, InvalidationMessage, KeyPattern, RemoteStore, TieredCache,
};
use stratum_backend::{BackendResult, MessageStream};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before unix epoch")
        .as_millis() as i64
}

/// DashMap-backed [`RemoteStore`] honoring per-key TTLs.
#[derive(Default)]
pub struct MemoryRemoteStore {
    values: DashMap<String, (Bytes, i64)>,
}

impl MemoryRemoteStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Raw fixture access for corrupting or inspecting stored envelopes.
    pub fn put_raw(&self, key: &str, value: impl Into<Bytes>, ttl: Duration) {
        self.values
            .insert(key.to_owned(), (value.into(), now_ms() + ttl.as_millis() as i64));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values
            .get(key)
            .is_some_and(|slot| slot.1 > now_ms())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, key: &str) -> BackendResult<Option<Bytes>> {
        Ok(self.values.get(key).and_then(|slot| {
            let (bytes, expire_at) = slot.value();
            (*expire_at > now_ms()).then(|| bytes.clone())
        }))
    }

    async fn mget(&self, keys: &[String]) -> BackendResult<Vec<Option<Bytes>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> BackendResult<()> {
        self.put_raw(key, value, ttl);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> BackendResult<u64> {
        let mut removed = 0;
        for key in keys {
            if self.values.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn del_pattern(&self, pattern: &str) -> BackendResult<u64> {
        let compiled = KeyPattern::compile(pattern);
        let matched: Vec<String> = self
            .values
            .iter()
            .filter(|slot| compiled.matches(slot.key()))
            .map(|slot| slot.key().clone())
            .collect();
        for key in &matched {
            self.values.remove(key);
        }
        Ok(matched.len() as u64)
    }
}

/// Broadcast-channel [`Backplane`].
///
/// Ignores the channel name, which doubles as a test feature: messages
/// carrying a foreign prefix still reach subscribers and must be dropped
/// by the receiving cache, not the transport.
pub struct LocalBus {
    tx: broadcast::Sender<InvalidationMessage>,
}

impl LocalBus {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(256);
        Arc::new(LocalBus { tx })
    }

    /// Injects a raw message, bypassing any cache instance.
    pub fn inject(&self, message: InvalidationMessage) {
        let _ = self.tx.send(message);
    }
}

#[async_trait]
impl Backplane for LocalBus {
    async fn publish(&self, _channel: &str, message: &InvalidationMessage) -> BackendResult<()> {
        // Send errors just mean nobody is subscribed.
        let _ = self.tx.send(message.clone());
        Ok(())
    }

    async fn subscribe(&self, _channel: &str) -> BackendResult<MessageStream> {
        let rx = self.tx.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((message, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed();
        Ok(stream)
    }
}

/// Builds a config with short worker intervals suited to tests.
pub fn test_config(prefix: &str, instance_id: &str) -> CacheConfig {
    CacheConfig::builder(prefix)
        .instance_id(instance_id)
        .cleanup_interval(Duration::from_millis(50))
        .flush_interval(Duration::from_millis(10))
        .build()
        .expect("valid test config")
}

/// A cache wired to the given bus, without a second level.
pub async fn cache_on_bus(prefix: &str, instance_id: &str, bus: Arc<LocalBus>) -> TieredCache {
    TieredCache::builder(test_config(prefix, instance_id))
        .backplane(bus)
        .build()
        .await
        .expect("cache build")
}

/// A cache wired to both the bus and a second-level store.
pub async fn cache_on_bus_with_l2(
    prefix: &str,
    instance_id: &str,
    bus: Arc<LocalBus>,
    store: Arc<MemoryRemoteStore>,
) -> TieredCache {
    let mut config = test_config(prefix, instance_id);
    config.use_remote_as_second_level = true;
    TieredCache::builder(config)
        .remote_store(store)
        .backplane(bus)
        .build()
        .await
        .expect("cache build")
}

/// Sleeps long enough for the pipeline flush, the publish hop and the
/// subscriber application to settle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}
