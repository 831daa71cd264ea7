// src/tests/queue_test.rs

use crate::config::BridgeSettings;
use crate::queue::{Bridge, Getter, Putter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static CHANNEL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh channel name per test, so parallel tests don't collide on
/// the same `<channel>.url` discovery file in the crate's cwd.
fn unique_channel(tag: &str) -> String {
    let n = CHANNEL_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("test_{}_{}_{}", tag, std::process::id(), n)
}

fn cleanup(channel: &str) {
    let _ = std::fs::remove_file(format!("{}.url", channel));
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
struct Payload(u32);

/// Scenario 5 (spec.md §8): one `Putter` sends five messages; a
/// `Getter` with `bulk_size = 2` calls `get()` three times and
/// receives `[1,2]`, `[3,4]`, `[5]` in that order — the whole bulk
/// each time, not one message flattened across calls.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ordering_is_preserved_with_small_bulk_size() {
    let channel = unique_channel("order");
    let settings = BridgeSettings {
        bulk_size: 2,
        ..BridgeSettings::default()
    };
    let _bridge = Bridge::bind(channel.clone(), &settings)
        .await
        .expect("bind bridge");

    let mut putter = Putter::connect(channel.clone())
        .await
        .expect("connect putter");
    for v in 1..=5u32 {
        putter.put(&Payload(v)).await.expect("put");
    }

    let getter = Getter::connect(channel.clone())
        .await
        .expect("connect getter");

    let first: Vec<Payload> = getter.get().await.expect("get 1");
    let second: Vec<Payload> = getter.get().await.expect("get 2");
    let third: Vec<Payload> = getter.get().await.expect("get 3");

    assert_eq!(first, vec![Payload(1), Payload(2)]);
    assert_eq!(second, vec![Payload(3), Payload(4)]);
    assert_eq!(third, vec![Payload(5)]);
    cleanup(&channel);
}

/// Two `Putter`s each send N messages concurrently; one `Getter`
/// receives all `2 * N`, with each producer's subsequence still in
/// send order (cross-producer interleaving is unconstrained).
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_in_preserves_per_putter_order() {
    const N: u32 = 200;
    let channel = unique_channel("fanin");
    let settings = BridgeSettings {
        bulk_size: 16,
        ..BridgeSettings::default()
    };
    let _bridge = Bridge::bind(channel.clone(), &settings)
        .await
        .expect("bind bridge");

    let chan_a = channel.clone();
    let producer_a = tokio::spawn(async move {
        let mut putter = Putter::connect(chan_a).await.expect("connect putter a");
        for v in 0..N {
            putter.put(&(0u8, v)).await.expect("put a");
        }
    });
    let chan_b = channel.clone();
    let producer_b = tokio::spawn(async move {
        let mut putter = Putter::connect(chan_b).await.expect("connect putter b");
        for v in 0..N {
            putter.put(&(1u8, v)).await.expect("put b");
        }
    });
    producer_a.await.expect("producer a task");
    producer_b.await.expect("producer b task");

    let getter = Getter::connect(channel.clone())
        .await
        .expect("connect getter");

    let mut last_seen: [Option<u32>; 2] = [None, None];
    let mut total = 0usize;
    while total < (N * 2) as usize {
        let bulk: Vec<(u8, u32)> = getter
            .get_nowait(5_000)
            .await
            .expect("get_nowait should not error")
            .expect("a bulk should arrive within the timeout");
        for (tag, v) in bulk {
            let slot = tag as usize;
            if let Some(prev) = last_seen[slot] {
                assert!(v > prev, "putter {} delivered out of order: {} after {}", tag, v, prev);
            }
            last_seen[slot] = Some(v);
            total += 1;
        }
    }

    assert_eq!(total, (N * 2) as usize);
    cleanup(&channel);
}

/// Round-trip law: `get(put(M))` yields a value equal to `M`.
#[tokio::test(flavor = "current_thread")]
async fn round_trip_preserves_payload() {
    let channel = unique_channel("roundtrip");
    let settings = BridgeSettings::default();
    let _bridge = Bridge::bind(channel.clone(), &settings)
        .await
        .expect("bind bridge");

    let mut putter = Putter::connect(channel.clone())
        .await
        .expect("connect putter");
    let getter = Getter::connect(channel.clone())
        .await
        .expect("connect getter");

    let payload = Payload(42);
    putter.put(&payload).await.expect("put");
    let received: Vec<Payload> = getter.get().await.expect("get");

    assert_eq!(received, vec![payload]);
    cleanup(&channel);
}

/// Boundary: `get_nowait(0)` against an empty queue returns `None`
/// without blocking.
#[tokio::test(flavor = "current_thread")]
async fn get_nowait_on_empty_queue_returns_none_immediately() {
    let channel = unique_channel("empty");
    let settings = BridgeSettings::default();
    let _bridge = Bridge::bind(channel.clone(), &settings)
        .await
        .expect("bind bridge");
    let getter = Getter::connect(channel.clone())
        .await
        .expect("connect getter");

    let start = std::time::Instant::now();
    let result: Option<Vec<Payload>> = getter.get_nowait(0).await.expect("get_nowait");
    assert!(result.is_none());
    assert!(
        start.elapsed() < Duration::from_millis(500),
        "get_nowait(0) should not block: took {:?}",
        start.elapsed()
    );

    cleanup(&channel);
}

/// No message is ever delivered to more than one consumer: two
/// `Getter`s racing against a single producer's output must partition
/// the messages between them, never duplicate one.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_message_is_delivered_twice() {
    const TOTAL: u32 = 100;
    let channel = unique_channel("nodupe");
    let settings = BridgeSettings::default();
    let _bridge = Bridge::bind(channel.clone(), &settings)
        .await
        .expect("bind bridge");

    let mut putter = Putter::connect(channel.clone())
        .await
        .expect("connect putter");
    for v in 0..TOTAL {
        putter.put(&Payload(v)).await.expect("put");
    }

    let getter_a = Getter::connect(channel.clone())
        .await
        .expect("connect getter a");
    let getter_b = Getter::connect(channel.clone())
        .await
        .expect("connect getter b");

    let mut seen = std::collections::HashSet::new();
    let mut total = 0usize;
    while total < TOTAL as usize {
        if let Some(bulk) = getter_a.get_nowait(200).await.expect("get_nowait a") {
            for Payload(v) in bulk {
                assert!(seen.insert(v), "message {} delivered more than once", v);
                total += 1;
            }
            continue;
        }
        if let Some(bulk) = getter_b.get_nowait(200).await.expect("get_nowait b") {
            for Payload(v) in bulk {
                assert!(seen.insert(v), "message {} delivered more than once", v);
                total += 1;
            }
        }
    }

    assert_eq!(seen.len(), TOTAL as usize);
    cleanup(&channel);
}
