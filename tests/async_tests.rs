//! Async Operation Tests
//!
//! Exercises the async facade variants and the async loader path: awaiting
//! loads on the caller's runtime, single-flight across concurrent tasks, and
//! cancellation of waiting callers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use polycache::{Cache, CacheError, EvictionStrategy};

fn async_loaded_cache(calls: Arc<AtomicUsize>) -> Cache<u32, u32> {
    Cache::builder()
        .maximum_size(100)
        .eviction_strategy(EvictionStrategy::Lru)
        .background_maintenance(false)
        .async_loader(move |k: &u32| {
            let key = *k;
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(Some(key * 2))
            }
        })
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_get_async_loads_and_caches() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = async_loaded_cache(Arc::clone(&calls));

    assert_eq!(cache.get_async(&21).await.unwrap(), Some(42));
    assert_eq!(cache.get_async(&21).await.unwrap(), Some(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = cache.stats();
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_async_single_flight() {
    const TASKS: usize = 20;

    let calls = Arc::new(AtomicUsize::new(0));
    let cache = async_loaded_cache(Arc::clone(&calls));

    let mut handles = Vec::new();
    for _ in 0..TASKS {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.get_async(&5).await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), Some(10));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1, "one load for all tasks");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_canceled_waiter_does_not_break_the_flight() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = async_loaded_cache(Arc::clone(&calls));

    let leader = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_async(&3).await })
    };
    // Give the leader time to start its flight, then join and bail out.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let waiter = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_async(&3).await })
    };
    waiter.abort();
    let _ = waiter.await;

    // The leader still completes and its result is cached.
    assert_eq!(leader.await.unwrap().unwrap(), Some(6));
    assert_eq!(cache.get_async(&3).await.unwrap(), Some(6));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_loader_failure_propagates() {
    let cache: Cache<u32, u32> = Cache::builder()
        .maximum_size(10)
        .eviction_strategy(EvictionStrategy::Lru)
        .background_maintenance(false)
        .async_loader(|_k: &u32| async { Err(CacheError::loader("remote unavailable")) })
        .build()
        .unwrap();

    let err = cache.get_async(&1).await.unwrap_err();
    assert!(err.is_loader_failure());
    assert!(!cache.contains(&1).unwrap());
    assert_eq!(cache.stats().load_failures, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_write_variants() {
    let cache: Cache<u32, u32> = Cache::builder()
        .maximum_size(10)
        .eviction_strategy(EvictionStrategy::Lru)
        .background_maintenance(false)
        .build()
        .unwrap();

    cache.put_async(1, 10).await.unwrap();
    assert_eq!(cache.get_async(&1).await.unwrap(), Some(10));
    assert_eq!(cache.remove_async(&1).await.unwrap(), Some(10));
    assert_eq!(cache.get_async(&1).await.unwrap(), None);

    cache.put_async(2, 20).await.unwrap();
    cache.clear_async().await.unwrap();
    assert_eq!(cache.size().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_loader_serves_async_callers() {
    let cache: Cache<u32, u32> = Cache::builder()
        .maximum_size(10)
        .eviction_strategy(EvictionStrategy::Lru)
        .background_maintenance(false)
        .loader(|k: &u32| Some(k + 1))
        .build()
        .unwrap();
    assert_eq!(cache.get_async(&9).await.unwrap(), Some(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_fails_async_operations() {
    let cache: Cache<u32, u32> = Cache::builder()
        .maximum_size(10)
        .eviction_strategy(EvictionStrategy::Lru)
        .background_maintenance(false)
        .build()
        .unwrap();
    cache.shutdown().unwrap();
    assert_eq!(cache.get_async(&1).await, Err(CacheError::Shutdown));
    assert_eq!(cache.put_async(1, 1).await, Err(CacheError::Shutdown));
}
