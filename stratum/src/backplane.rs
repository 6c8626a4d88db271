//! The backplane adapter.
//!
//! Outbound: local change events become invalidation messages, published
//! fire-and-forget on the channel named by the application cache prefix.
//! Inbound: peer messages are applied to the local store with loopback
//! suppression and a fingerprint guard that skips removals the local
//! state already reflects.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, trace, warn};

use stratum_backend::{Backplane, InvalidationMessage, MessageStream};
use stratum_core::{EntryEvent, KeyPattern};

use crate::metrics;
use crate::store::MemoryStore;

/// Outbound half: builds and publishes messages for local change events.
pub(crate) struct BackplaneAdapter {
    bus: Arc<dyn Backplane>,
    prefix: String,
    instance_id: String,
}

impl BackplaneAdapter {
    pub(crate) fn new(
        bus: Arc<dyn Backplane>,
        prefix: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        BackplaneAdapter {
            bus,
            prefix: prefix.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Publishes the message for a local change event, fire-and-forget.
    ///
    /// Publication is best-effort: a failure must never fail the local
    /// operation, so the publish runs on its own task and only logs.
    pub(crate) fn publish_event(&self, event: &EntryEvent) {
        let message = InvalidationMessage {
            application_cache_prefix: self.prefix.clone(),
            instance_id: self.instance_id.clone(),
            key: event.key.clone(),
            is_pattern: event.is_pattern,
            fingerprint: event.fingerprint.clone(),
            timestamp: Some(event.timestamp_ms),
        };
        let bus = Arc::clone(&self.bus);
        let channel = self.prefix.clone();
        tokio::spawn(async move {
            match bus.publish(&channel, &message).await {
                Ok(()) => metrics::record_published(),
                Err(error) => warn!(key = %message.key, %error, "invalidation publish failed"),
            }
        });
    }
}

/// Inbound half: drains an established subscription stream and applies
/// peer mutations to the local store.
///
/// Subscribing happens at cache construction so failures surface there;
/// this loop runs until the stream ends (transport closed) or the task is
/// aborted at cache shutdown.
pub(crate) async fn drain_inbound(
    mut stream: MessageStream,
    prefix: String,
    instance_id: String,
    store: Arc<MemoryStore>,
) {
    debug!(channel = %prefix, "backplane subscription established");
    while let Some(message) = stream.next().await {
        apply_message(&store, &prefix, &instance_id, message);
    }
    debug!(channel = %prefix, "backplane subscription ended");
}

/// Applies one inbound message.
///
/// Split from the subscription loop so tests can drive it directly.
pub(crate) fn apply_message(
    store: &MemoryStore,
    prefix: &str,
    instance_id: &str,
    message: InvalidationMessage,
) {
    if message.application_cache_prefix != prefix {
        trace!(got = %message.application_cache_prefix, "dropped message for foreign prefix");
        metrics::record_dropped();
        return;
    }
    if message.instance_id == instance_id {
        trace!(key = %message.key, "dropped loopback message");
        metrics::record_dropped();
        return;
    }

    if message.is_pattern {
        let removed = store.remove_by_pattern(&KeyPattern::compile(&message.key));
        debug!(pattern = %message.key, removed = removed.len(), "applied peer pattern removal");
        metrics::record_applied();
    } else {
        // Skip the removal when the local fingerprint equals the
        // message's: the local copy already matches what the sender just
        // established, so the message is redundant.
        let message_fp = message.fingerprint.as_deref();
        let guard = move |local: Option<&str>| local.is_some() && local == message_fp;
        let outcome = store.remove(&message.key, Some(&guard));
        trace!(key = %message.key, ?outcome, "applied peer removal");
        metrics::record_applied();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stratum_core::{CacheEntry, EvictionPolicy};

    fn store_with(keys: &[&str]) -> MemoryStore {
        let store = MemoryStore::new(EvictionPolicy::Lru);
        for key in keys {
            let entry = Arc::new(CacheEntry::new(*key, 1u32, Duration::from_secs(60)));
            entry.update_fingerprint(usize::MAX).unwrap();
            store.insert(entry);
        }
        store
    }

    fn message(instance_id: &str, key: &str) -> InvalidationMessage {
        InvalidationMessage {
            application_cache_prefix: "app".to_owned(),
            instance_id: instance_id.to_owned(),
            key: key.to_owned(),
            is_pattern: false,
            fingerprint: None,
            timestamp: None,
        }
    }

    #[test]
    fn loopback_messages_do_not_mutate() {
        let store = store_with(&["k"]);
        apply_message(&store, "app", "self", message("self", "k"));
        assert!(store.get_entry("k").is_some());
    }

    #[test]
    fn foreign_prefix_is_dropped() {
        let store = store_with(&["k"]);
        let mut msg = message("peer", "k");
        msg.application_cache_prefix = "other".to_owned();
        apply_message(&store, "app", "self", msg);
        assert!(store.get_entry("k").is_some());
    }

    #[test]
    fn peer_removal_applies() {
        let store = store_with(&["k"]);
        apply_message(&store, "app", "self", message("peer", "k"));
        assert!(store.get_entry("k").is_none());
    }

    #[test]
    fn equal_fingerprint_skips() {
        let store = store_with(&["k"]);
        let fp = store.get_entry("k").unwrap().fingerprint().unwrap().to_owned();
        let mut msg = message("peer", "k");
        msg.fingerprint = Some(fp);
        apply_message(&store, "app", "self", msg);
        assert!(store.get_entry("k").is_some(), "matching fingerprint means the state already agrees");
    }

    #[test]
    fn different_fingerprint_removes() {
        let store = store_with(&["k"]);
        let mut msg = message("peer", "k");
        msg.fingerprint = Some("0123456789abcdef0123456789abcdef".to_owned());
        apply_message(&store, "app", "self", msg);
        assert!(store.get_entry("k").is_none());
    }

    #[test]
    fn pattern_messages_remove_matches() {
        let store = store_with(&["a1", "a2", "b1"]);
        let mut msg = message("peer", "a*");
        msg.is_pattern = true;
        apply_message(&store, "app", "self", msg.clone());
        assert!(store.get_entry("a1").is_none());
        assert!(store.get_entry("a2").is_none());
        assert!(store.get_entry("b1").is_some());

        // Duplicate delivery is idempotent.
        apply_message(&store, "app", "self", msg);
        assert!(store.get_entry("b1").is_some());
    }
}
