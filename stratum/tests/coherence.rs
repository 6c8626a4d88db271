//! Cross-instance coherence over the backplane.

mod common;

use common::{LocalBus, cache_on_bus, settle};

use stratum::InvalidationMessage;

async fn sorted_keys(cache: &stratum::TieredCache, keys: &[&str]) -> Vec<String> {
    let mut held = Vec::new();
    for key in keys {
        if cache.get::<u32>(key).await.is_some() {
            held.push((*key).to_owned());
        }
    }
    held
}

#[tokio::test(flavor = "multi_thread")]
async fn a_write_on_one_instance_invalidates_the_other() {
    let bus = LocalBus::new();
    let c1 = cache_on_bus("app", "instance-1", bus.clone()).await;
    let c2 = cache_on_bus("app", "instance-2", bus.clone()).await;

    c1.set("1", "v1".to_owned(), None).await;
    settle().await;

    c2.set("1", "v2".to_owned(), None).await;
    settle().await;

    assert_eq!(
        c1.get::<String>("1").await,
        None,
        "c1's copy must have been invalidated by c2's write"
    );
    assert_eq!(c2.get::<String>("1").await.as_deref(), Some("v2"));
}

#[tokio::test(flavor = "multi_thread")]
async fn pattern_removal_propagates_across_instances() {
    let bus = LocalBus::new();
    let c1 = cache_on_bus("app", "instance-1", bus.clone()).await;
    let c2 = cache_on_bus("app", "instance-2", bus.clone()).await;

    for key in ["11", "12", "22", "13", "23", "33"] {
        c1.set(key, 0u32, None).await;
    }
    settle().await;

    c2.remove_by_pattern("2*").await;
    settle().await;
    assert_eq!(
        sorted_keys(&c1, &["11", "12", "22", "13", "23", "33"]).await,
        vec!["11", "12", "13", "33"]
    );

    c2.remove_by_pattern("1*").await;
    settle().await;
    assert_eq!(
        sorted_keys(&c1, &["11", "12", "22", "13", "23", "33"]).await,
        vec!["33"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn own_messages_never_invalidate_own_state() {
    let bus = LocalBus::new();
    let c1 = cache_on_bus("app", "instance-1", bus.clone()).await;

    c1.set("k", 7u32, None).await;
    settle().await;

    // The instance received its own AddOrUpdate over the bus; loopback
    // suppression must have dropped it.
    assert_eq!(c1.get::<u32>("k").await, Some(7));
}

#[tokio::test(flavor = "multi_thread")]
async fn equal_fingerprints_skip_the_removal() {
    let bus = LocalBus::new();
    let c1 = cache_on_bus("app", "instance-1", bus.clone()).await;
    let c2 = cache_on_bus("app", "instance-2", bus.clone()).await;

    // Both instances write the same payload; the cross invalidation
    // carries the same content fingerprint and must be skipped.
    c1.set("k", "same".to_owned(), None).await;
    settle().await;
    c2.set("k", "same".to_owned(), None).await;
    settle().await;

    assert_eq!(c1.get::<String>("k").await.as_deref(), Some("same"));
    assert_eq!(c2.get::<String>("k").await.as_deref(), Some("same"));

    // A different payload changes the fingerprint; now the peer drops.
    c2.set("k", "different".to_owned(), None).await;
    settle().await;
    assert_eq!(c1.get::<String>("k").await, None);
    assert_eq!(c2.get::<String>("k").await.as_deref(), Some("different"));
}

#[tokio::test(flavor = "multi_thread")]
async fn pattern_removal_is_idempotent() {
    let bus = LocalBus::new();
    let c1 = cache_on_bus("app", "instance-1", bus.clone()).await;

    for key in ["a1", "a2", "b1"] {
        c1.set(key, 0u32, None).await;
    }
    settle().await;

    let message = InvalidationMessage {
        application_cache_prefix: "app".to_owned(),
        instance_id: "someone-else".to_owned(),
        key: "a*".to_owned(),
        is_pattern: true,
        fingerprint: None,
        timestamp: None,
    };
    bus.inject(message.clone());
    settle().await;
    assert_eq!(sorted_keys(&c1, &["a1", "a2", "b1"]).await, vec!["b1"]);

    // Re-delivery of the same message leaves the state unchanged.
    bus.inject(message);
    settle().await;
    assert_eq!(sorted_keys(&c1, &["a1", "a2", "b1"]).await, vec!["b1"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn foreign_prefixes_are_ignored() {
    let bus = LocalBus::new();
    let c1 = cache_on_bus("app", "instance-1", bus.clone()).await;

    c1.set("k", 1u32, None).await;
    settle().await;

    bus.inject(InvalidationMessage {
        application_cache_prefix: "other-app".to_owned(),
        instance_id: "someone-else".to_owned(),
        key: "k".to_owned(),
        is_pattern: false,
        fingerprint: None,
        timestamp: None,
    });
    settle().await;

    assert_eq!(c1.get::<u32>("k").await, Some(1), "foreign-prefix message must be dropped");
}

#[tokio::test(flavor = "multi_thread")]
async fn removal_without_a_fingerprint_always_removes() {
    let bus = LocalBus::new();
    let c1 = cache_on_bus("app", "instance-1", bus.clone()).await;

    c1.set("k", 1u32, None).await;
    settle().await;

    bus.inject(InvalidationMessage {
        application_cache_prefix: "app".to_owned(),
        instance_id: "someone-else".to_owned(),
        key: "k".to_owned(),
        is_pattern: false,
        fingerprint: None,
        timestamp: None,
    });
    settle().await;

    assert_eq!(c1.get::<u32>("k").await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_propagates_as_a_star_pattern() {
    let bus = LocalBus::new();
    let c1 = cache_on_bus("app", "instance-1", bus.clone()).await;
    let c2 = cache_on_bus("app", "instance-2", bus.clone()).await;

    c1.set("a", 1u32, None).await;
    c1.set("b", 2u32, None).await;
    c2.set("c", 3u32, None).await;
    settle().await;

    c2.clear().await;
    settle().await;

    assert_eq!(c1.get::<u32>("a").await, None);
    assert_eq!(c1.get::<u32>("b").await, None);
    assert_eq!(c2.get::<u32>("c").await, None);
}
