use super::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::tracker::Tracker;

fn config() -> GovernorConfig {
    GovernorConfig {
        poll_interval_ms: 5,
        ..GovernorConfig::default()
    }
}

const TTL: Duration = Duration::from_secs(30);
const WAIT: Duration = Duration::from_secs(20);

/// Run `workers` tasks that each hold a slot of `max` for a few milliseconds,
/// spreading them over `governors`. Returns the peak observed concurrency.
async fn peak_concurrency(governors: Vec<Governor>, workers: usize, max: usize) -> usize {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut set = tokio::task::JoinSet::new();
    for i in 0..workers {
        let gov = governors[i % governors.len()].clone();
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        set.spawn(async move {
            for _ in 0..3 {
                let guard = gov.acquire("embedding", max, TTL, WAIT).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(15)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                guard.release().await;
            }
        });
    }
    while let Some(res) = set.join_next().await {
        res.unwrap();
    }
    peak.load(Ordering::SeqCst)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_workers_never_exceed_five_in_memory() {
    let gov = Governor::in_memory(&config());
    let peak = peak_concurrency(vec![gov.clone()], 10, 5).await;
    assert!(peak <= 5, "peak {peak}");
    assert!(peak >= 1);
    assert_eq!(gov.held("embedding").await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_processes_sharing_sqlite_never_exceed_five() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docket.db");
    let a = Tracker::open_at(&path).await.unwrap();
    let b = Tracker::open_at(&path).await.unwrap();
    let store_a = SqliteSlotStore::new(a.pool().clone()).await.unwrap();
    let store_b = SqliteSlotStore::new(b.pool().clone()).await.unwrap();
    let gov_a = Governor::new(Arc::new(store_a), &config());
    let gov_b = Governor::new(Arc::new(store_b), &config());

    let peak = peak_concurrency(vec![gov_a.clone(), gov_b], 10, 5).await;
    assert!(peak <= 5, "peak {peak}");
    assert_eq!(gov_a.held("embedding").await.unwrap(), 0);
}

#[tokio::test]
async fn full_set_times_out() {
    let gov = Governor::in_memory(&config());
    let held = gov.acquire("recognition", 1, TTL, WAIT).await.unwrap();
    assert!(held.token().is_some());

    let err = gov
        .acquire("recognition", 1, TTL, Duration::from_millis(30))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, GovernorError::Timeout { ref name, .. } if name == "recognition"));

    // Other names are independent.
    gov.acquire("embedding", 1, TTL, WAIT).await.unwrap().release().await;
    held.release().await;
}

#[tokio::test]
async fn release_wakes_waiter_before_next_poll() {
    let slow_poll = GovernorConfig {
        poll_interval_ms: 60_000,
        ..GovernorConfig::default()
    };
    let gov = Governor::in_memory(&slow_poll);
    let held = gov.acquire("extraction", 1, TTL, WAIT).await.unwrap();

    let waiter = {
        let gov = gov.clone();
        tokio::spawn(async move { gov.acquire("extraction", 1, TTL, WAIT).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    held.release().await;

    let got = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter woken by release")
        .unwrap();
    assert!(got.is_ok());
}

#[tokio::test]
async fn dropped_guard_is_released() {
    let gov = Governor::in_memory(&config());
    let guard = gov.acquire("recognition", 2, TTL, WAIT).await.unwrap();
    assert_eq!(gov.held("recognition").await.unwrap(), 1);
    drop(guard);
    for _ in 0..100 {
        if gov.held("recognition").await.unwrap() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("dropped slot was never released");
}

#[tokio::test]
async fn expired_slots_are_reclaimed() {
    let store = MemorySlotStore::new();
    assert!(store
        .try_acquire("ocr", "crashed", 1, Duration::from_millis(1))
        .await
        .unwrap());
    assert!(!store.try_acquire("ocr", "next", 1, TTL).await.unwrap());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(store.try_acquire("ocr", "next", 1, TTL).await.unwrap());
    assert_eq!(store.held("ocr").await.unwrap(), 1);
}

#[tokio::test]
async fn sqlite_store_counts_and_releases() {
    let t = Tracker::open_in_memory().await.unwrap();
    let store = SqliteSlotStore::new(t.pool().clone()).await.unwrap();
    assert!(store.try_acquire("ocr", "a", 2, TTL).await.unwrap());
    assert!(store.try_acquire("ocr", "b", 2, TTL).await.unwrap());
    assert!(!store.try_acquire("ocr", "c", 2, TTL).await.unwrap());
    assert_eq!(store.held("ocr").await.unwrap(), 2);
    store.release("ocr", "a").await.unwrap();
    store.release("ocr", "missing").await.unwrap();
    assert!(store.try_acquire("ocr", "c", 2, TTL).await.unwrap());
}

struct DownStore;

#[async_trait]
impl SlotStore for DownStore {
    async fn try_acquire(&self, _: &str, _: &str, _: usize, _: Duration) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn release(&self, _: &str, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn held(&self, _: &str) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

#[tokio::test]
async fn unreachable_store_degrades_to_local_bound() {
    let cfg = GovernorConfig {
        fallback_limit: Some(2),
        ..config()
    };
    let gov = Governor::new(Arc::new(DownStore), &cfg);
    let a = gov.acquire("embedding", 8, TTL, WAIT).await.unwrap();
    let b = gov.acquire("embedding", 8, TTL, WAIT).await.unwrap();
    assert!(a.is_degraded() && b.is_degraded());
    assert!(a.token().is_none());

    let third = gov
        .acquire("embedding", 8, TTL, Duration::from_millis(30))
        .await;
    assert!(matches!(third, Err(GovernorError::Timeout { .. })));

    a.release().await;
    let c = gov.acquire("embedding", 8, TTL, WAIT).await.unwrap();
    assert!(c.is_degraded());
    drop((b, c));
}
