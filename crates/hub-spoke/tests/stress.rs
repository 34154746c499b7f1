//! Stress tests for hub-spoke
//!
//! These tests verify the stores under concurrent writers and with eviction
//! racing navigation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use hub_core::{
    ChannelConfig, Clock, ContentKey, ManualClock, StaticChannelRegistry, TimeBucket, TimeSource,
    TimeUnit,
};
use hub_spoke::{
    FileSpokeStore, FileSpokeStoreConfig, InMemorySpokeStore, SpokeStore, TtlConfig, TtlEnforcer,
};
use tempfile::TempDir;

const CHANNEL: &str = "flights";

fn origin() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2014-11-18T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Key `i` milliseconds after the origin, spread over many minutes
fn spread_key(writer: usize, i: usize) -> ContentKey {
    let offset = TimeDelta::milliseconds((i as i64) * 1_237);
    ContentKey::new(origin() + offset, format!("w{writer}")).unwrap()
}

async fn file_store() -> (Arc<FileSpokeStore>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = FileSpokeStoreConfig::new(temp_dir.path()).with_sync_writes(false);
    let store = FileSpokeStore::open(config).await.unwrap();
    (Arc::new(store), temp_dir)
}

async fn walk_forward(store: &dyn SpokeStore) -> Vec<ContentKey> {
    let mut seen = Vec::new();
    let mut current = store.first(CHANNEL).await;
    while let Some(k) = current {
        current = store.next(CHANNEL, &k).await;
        seen.push(k);
    }
    seen
}

// ============================================================================
// Concurrent Writers
// ============================================================================

/// Several writers filling the same minutes
///
/// Every written key must be reachable by walking `next` from the first key,
/// exactly once and in order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_file_store() {
    const WRITERS: usize = 8;
    const PER_WRITER: usize = 200;

    let (store, _temp_dir) = file_store().await;
    let start = Instant::now();

    let mut handles = Vec::new();
    for writer in 0..WRITERS {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..PER_WRITER {
                let k = spread_key(writer, i);
                store.write(CHANNEL, &k, k.hash().as_bytes()).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    println!(
        "Wrote {} items in {:?}",
        WRITERS * PER_WRITER,
        start.elapsed()
    );

    let walked = walk_forward(store.as_ref()).await;
    assert_eq!(walked.len(), WRITERS * PER_WRITER);
    assert!(walked.windows(2).all(|pair| pair[0] < pair[1]));
}

/// Throughput of the in-memory store
#[tokio::test]
async fn test_memory_store_throughput() {
    const ITEMS: usize = 10_000;
    let store = InMemorySpokeStore::new();

    let start = Instant::now();
    for i in 0..ITEMS {
        store.write(CHANNEL, &spread_key(0, i), b"x").await.unwrap();
    }
    println!("Stored {} items in {:?}", ITEMS, start.elapsed());

    assert_eq!(store.len(CHANNEL), ITEMS);
    assert_eq!(walk_forward(&store).await.len(), ITEMS);
}

// ============================================================================
// Navigation Racing Eviction
// ============================================================================

/// Walking `next` while minute buckets are deleted underneath
///
/// The walk must terminate without panicking and only ever move forward.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_next_during_eviction() {
    const ITEMS: usize = 600;
    let (store, _temp_dir) = file_store().await;
    for i in 0..ITEMS {
        let k = spread_key(0, i);
        store.write(CHANNEL, &k, b"x").await.unwrap();
    }

    let evictor = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut minute = TimeBucket::new(TimeUnit::Minutes, origin());
            for _ in 0..15 {
                store.delete(CHANNEL, Some(&minute)).await.unwrap();
                tokio::task::yield_now().await;
                match minute.next() {
                    Some(next) => minute = next,
                    None => break,
                }
            }
        })
    };

    let walker = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::timeout(Duration::from_secs(30), walk_forward(store.as_ref()))
                .await
                .expect("walk did not finish")
        })
    };

    evictor.await.unwrap();
    let walked = walker.await.unwrap();
    assert!(walked.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(walked.len() <= ITEMS);
}

/// Sweeper cycles running alongside writers stamped "now"
///
/// Items inside the retention window must survive every cycle.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweeper_with_live_writers() {
    let (store, _temp_dir) = file_store().await;
    let clock = ManualClock::new(origin() + TimeDelta::hours(3));
    let enforcer = TtlEnforcer::new(
        store.clone(),
        Arc::new(StaticChannelRegistry::from_configs([
            ChannelConfig::new(CHANNEL, 60).unwrap(),
        ])),
        TimeSource::new(clock.clone()),
        TtlConfig::default(),
    );

    // one item per minute for the last three hours
    for minute in 0..180 {
        let k = ContentKey::new(origin() + TimeDelta::minutes(minute), "m").unwrap();
        store.write(CHANNEL, &k, b"x").await.unwrap();
    }

    for _ in 0..5 {
        let writer = {
            let store = store.clone();
            let now = clock.now_utc();
            tokio::spawn(async move {
                for i in 0..20 {
                    let k = ContentKey::new(now + TimeDelta::milliseconds(i), "live").unwrap();
                    store.write(CHANNEL, &k, b"x").await.unwrap();
                }
            })
        };
        let report = enforcer.sweep_once().await;
        writer.await.unwrap();
        assert_eq!(report.failures, 0);
        clock.advance(Duration::from_secs(60));
    }

    let walked = walk_forward(store.as_ref()).await;
    let live = walked.iter().filter(|k| k.hash() == "live").count();
    assert_eq!(live, 100);

    // the last cycle ran with stable time 03:03:55, keeping 02:03:55 onwards
    let window_start = origin() + TimeDelta::minutes(124);
    let retained = walked
        .iter()
        .filter(|k| k.hash() == "m" && k.time() >= window_start)
        .count();
    assert_eq!(retained, 56);
    assert!(walked.iter().all(|k| k.time() >= origin() + TimeDelta::hours(1)));
}
