//! Contract Test: Cache Invalidation on Network Change
//!
//! Addresses handed out by the service depend on the client's network, so a
//! connectivity change drops every cached record.
//!
//! Constraints verified:
//! - `invalidate_all` empties the cache; the next lookup is a hard miss
//! - Network change events delivered through `watch_network` invalidate the
//!   cache and re-warm the keepalive set
//! - The persisted copy is cleared as well
//! - A resolution sent before the change is not cached, and lookups after the
//!   change send a new request

mod common;

use common::*;
use httpdns_core::traits::{NetworkChangeEvent, NetworkKind};
use httpdns_core::{
    CacheStore, Freshness, KeepaliveDomain, MemoryCacheStore, ResolverEvent, StackMode,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[tokio::test]
async fn invalidate_all_turns_hits_into_misses() {
    let mut harness = Harness::new(test_config());

    for domain in ["a.example.com", "b.example.com"] {
        harness.coordinator.lookup(domain, StackMode::V4).await.unwrap();
    }
    assert_eq!(harness.coordinator.cache().len(), 2);
    assert_eq!(harness.transport.call_count(), 2);

    harness.coordinator.invalidate_all("test").await;
    assert!(harness.coordinator.cache().is_empty());
    assert_eq!(
        harness.coordinator.cache().get("a.example.com", StackMode::V4).1,
        Freshness::Absent
    );

    harness
        .coordinator
        .lookup("a.example.com", StackMode::V4)
        .await
        .unwrap();
    assert_eq!(harness.transport.call_count(), 3, "Lookup after invalidation must miss");

    let invalidated = harness
        .drain_events()
        .into_iter()
        .any(|e| e == ResolverEvent::CacheInvalidated { reason: "test".into() });
    assert!(invalidated);
}

#[tokio::test]
async fn network_change_invalidates_and_rewarms_keepalive_domains() {
    let mut config = test_config();
    config.keepalive.enabled = true;
    config.keepalive.domains = vec![KeepaliveDomain::new("api.example.com", StackMode::V4)];
    let harness = Harness::new(config);

    harness
        .coordinator
        .lookup("other.example.com", StackMode::V4)
        .await
        .unwrap();
    harness
        .coordinator
        .lookup("api.example.com", StackMode::V4)
        .await
        .unwrap();
    assert_eq!(harness.transport.call_count(), 2);

    let (tx, rx) = mpsc::unbounded_channel();
    let watcher = harness
        .coordinator
        .watch_network(Box::pin(UnboundedReceiverStream::new(rx)));

    tx.send(NetworkChangeEvent::new(NetworkKind::Wifi).with_ssid("office"))
        .unwrap();
    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .expect("watcher ends with the stream")
        .unwrap();
    harness.wait_idle().await;

    // Only the keepalive domain came back
    assert_eq!(
        harness.coordinator.cache().get("other.example.com", StackMode::V4).1,
        Freshness::Absent
    );
    assert_eq!(
        harness.coordinator.cache().get("api.example.com", StackMode::V4).1,
        Freshness::Fresh
    );
    assert_eq!(harness.transport.requests_for("api.example.com"), 2);
}

#[tokio::test]
async fn invalidation_clears_the_persisted_copy() {
    let store = MemoryCacheStore::new();
    let mut config = test_config();
    config.cache.persist_enabled = true;
    let harness = Harness::with_store(config, Some(Arc::new(store.clone())));

    harness
        .coordinator
        .lookup("a.example.com", StackMode::V4)
        .await
        .unwrap();
    assert_eq!(store.load_all().await.unwrap().len(), 1);

    harness.coordinator.invalidate_all("network changed").await;
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn resolutions_in_flight_during_a_network_change_are_not_cached() {
    let mut config = test_config();
    config.keepalive.enabled = true;
    config.keepalive.domains = vec![KeepaliveDomain::new("a.example.com", StackMode::V4)];
    let harness = Harness::new(config);
    harness.transport.set_answer("a.example.com", "1.1.1.1,600");
    harness.transport.set_delay(Duration::from_millis(100));

    assert!(harness.coordinator.refresh("a.example.com", StackMode::V4).unwrap());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.transport.requests_for("a.example.com"), 1);

    // The old network's answer is still on the wire
    harness.transport.set_answer("a.example.com", "2.2.2.2,600");
    harness
        .coordinator
        .on_network_change(NetworkChangeEvent::new(NetworkKind::Wifi))
        .await;

    let ips = harness
        .coordinator
        .lookup("a.example.com", StackMode::V4)
        .await
        .unwrap();
    assert_eq!(ips, vec!["2.2.2.2".parse::<std::net::IpAddr>().unwrap()]);

    // Let the stale resolution land
    tokio::time::sleep(Duration::from_millis(150)).await;
    harness.wait_idle().await;

    let (record, freshness) = harness.coordinator.cache().get("a.example.com", StackMode::V4);
    assert_eq!(freshness, Freshness::Fresh);
    assert_eq!(
        record.unwrap().ips,
        vec!["2.2.2.2".parse::<std::net::IpAddr>().unwrap()]
    );
    assert_eq!(harness.transport.requests_for("a.example.com"), 2);
}
