//! Single-flight guarantees of `get_or_load`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use stratum::{CacheConfig, CacheError, TieredCache};

async fn local_cache() -> TieredCache {
    let config = CacheConfig::builder("single-flight").build().unwrap();
    TieredCache::builder(config).build().await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn waiters_converge_on_the_inflight_factory() {
    let cache = Arc::new(local_cache().await);
    let fast_factory_runs = Arc::new(AtomicUsize::new(0));

    let slow = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            cache
                .get_or_load(
                    "k",
                    |_| async {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        Ok("slow-value".to_owned())
                    },
                    Some(Duration::from_secs(100)),
                    None,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let fast_runs = Arc::clone(&fast_factory_runs);
    let value = cache
        .get_or_load(
            "k",
            |_| {
                let fast_runs = Arc::clone(&fast_runs);
                async move {
                    fast_runs.fetch_add(1, Ordering::SeqCst);
                    Ok("fast-value".to_owned())
                }
            },
            Some(Duration::from_secs(100)),
            None,
        )
        .await
        .unwrap();
    let blocked = started.elapsed();

    assert_eq!(value, "slow-value", "the waiter must see the in-flight result");
    assert_eq!(fast_factory_runs.load(Ordering::SeqCst), 0, "fast factory must never run");
    assert!(
        blocked >= Duration::from_millis(300),
        "the waiter should have blocked on the slow factory, blocked {blocked:?}"
    );
    assert_eq!(slow.await.unwrap().unwrap(), "slow-value");
}

#[tokio::test(flavor = "multi_thread")]
async fn waiter_with_a_short_budget_times_out() {
    let cache = Arc::new(local_cache().await);

    let slow = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            cache
                .get_or_load(
                    "k",
                    |_| async {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        Ok(42u32)
                    },
                    Some(Duration::from_secs(100)),
                    None,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;

    let impatient = cache
        .get_or_load(
            "k",
            |_| async { Ok(7u32) },
            Some(Duration::from_secs(100)),
            Some(Duration::from_millis(100)),
        )
        .await;
    assert!(
        matches!(impatient, Err(CacheError::FactoryLockTimeout { .. })),
        "expected a lock timeout, got {impatient:?}"
    );

    // The in-flight factory is unaffected; its value still lands.
    assert_eq!(slow.await.unwrap().unwrap(), 42);
    assert_eq!(cache.get::<u32>("k").await, Some(42));
}

#[tokio::test(flavor = "multi_thread")]
async fn factory_errors_propagate_and_release_the_lock() {
    let cache = local_cache().await;

    let failed = cache
        .get_or_load::<u32, _, _>(
            "k",
            |_| async { Err("upstream exploded".into()) },
            None,
            None,
        )
        .await;
    match failed {
        Err(CacheError::Factory(source)) => {
            assert_eq!(source.to_string(), "upstream exploded");
        }
        other => panic!("expected a factory error, got {other:?}"),
    }
    assert_eq!(cache.get::<u32>("k").await, None, "no entry may be installed");

    // The lock must have been released for the next caller.
    let recovered = cache
        .get_or_load("k", |_| async { Ok(5u32) }, None, None)
        .await
        .unwrap();
    assert_eq!(recovered, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn hit_path_skips_the_factory_entirely() {
    let cache = local_cache().await;
    cache.set("k", 1u32, None).await;

    let runs = Arc::new(AtomicUsize::new(0));
    let value = cache
        .get_or_load(
            "k",
            |_| {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(2u32)
                }
            },
            None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(value, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}
