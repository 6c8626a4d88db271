//! The second-level mirror.
//!
//! Keeps the remote store in step with local mutations and serves L1
//! misses from it. The mirror never mediates liveness or coherence (the
//! backplane does); it only makes warm restarts and cold L1s cheap. Every
//! failure here is logged and swallowed; the local L1 keeps serving.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use stratum_backend::RemoteStore;
use stratum_core::{CacheEntry, Raw, epoch_ms};

use crate::metrics;

/// Remote-store frontage scoped to one cache's namespace.
///
/// Remote keys are `"{prefix}:{cache_key}"`; the prefix isolates
/// applications sharing one store deployment.
pub(crate) struct RemoteMirror {
    store: Arc<dyn RemoteStore>,
    prefix: String,
}

impl RemoteMirror {
    pub(crate) fn new(store: Arc<dyn RemoteStore>, prefix: impl Into<String>) -> Self {
        RemoteMirror {
            store,
            prefix: prefix.into(),
        }
    }

    fn remote_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    /// Mirrors a completed write: stores the envelope under the prefixed
    /// key with the entry's remaining TTL.
    pub(crate) async fn mirror_write(&self, entry: &CacheEntry, envelope: Raw) {
        let remaining_ms = entry.absolute_expire_at_ms() - epoch_ms();
        if remaining_ms <= 0 {
            debug!(key = entry.key(), "entry expired before its mirror write; skipped");
            return;
        }
        let ttl = Duration::from_millis(remaining_ms as u64);
        if let Err(error) = self
            .store
            .set(&self.remote_key(entry.key()), envelope, ttl)
            .await
        {
            warn!(key = entry.key(), %error, "second-level mirror write failed");
        }
    }

    /// Mirrors removals of concrete keys.
    pub(crate) async fn mirror_remove(&self, keys: &[String]) {
        let prefixed: Vec<String> = keys.iter().map(|key| self.remote_key(key)).collect();
        if let Err(error) = self.store.del(&prefixed).await {
            warn!(keys = keys.len(), %error, "second-level mirror delete failed");
        }
    }

    /// Mirrors a pattern removal with one server-side pass.
    pub(crate) async fn mirror_remove_pattern(&self, pattern: &str) {
        let prefixed = self.remote_key(pattern);
        if let Err(error) = self.store.del_pattern(&prefixed).await {
            warn!(pattern, %error, "second-level pattern delete failed");
        }
    }

    /// Serves an L1 miss from the remote store.
    ///
    /// Returns the raw envelope bytes on hit; decoding is the caller's
    /// concern because only the read site knows the payload type.
    pub(crate) async fn read_through(&self, key: &str) -> Option<Raw> {
        match self.store.get(&self.remote_key(key)).await {
            Ok(Some(bytes)) => {
                metrics::record_l2_hit();
                Some(bytes)
            }
            Ok(None) => None,
            Err(error) => {
                warn!(key, %error, "second-level read-through failed; treating as miss");
                None
            }
        }
    }

    /// Batch read-through over one MGET, aligned to `keys`.
    pub(crate) async fn read_through_many(&self, keys: &[String]) -> Vec<Option<Raw>> {
        let prefixed: Vec<String> = keys.iter().map(|key| self.remote_key(key)).collect();
        match self.store.mget(&prefixed).await {
            Ok(values) if values.len() == keys.len() => values,
            Ok(values) => {
                warn!(
                    expected = keys.len(),
                    got = values.len(),
                    "second-level MGET returned a misaligned result; treating as misses"
                );
                vec![None; keys.len()]
            }
            Err(error) => {
                warn!(keys = keys.len(), %error, "second-level batch read-through failed; treating as misses");
                vec![None; keys.len()]
            }
        }
    }
}
