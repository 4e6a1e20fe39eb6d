//! Contract Test: Keepalive Scheduler
//!
//! Keepalive domains are re-resolved on a fixed cadence even while fresh,
//! except when fetched within the minimum interval. The scheduler stops
//! deterministically on its shutdown signal.

mod common;

use common::*;
use httpdns_core::{KeepaliveDomain, KeepaliveScheduler, ResolverEvent, StackMode};
use std::time::Duration;
use tokio::sync::oneshot;

fn keepalive_config() -> httpdns_core::HttpDnsConfig {
    let mut config = test_config();
    config.keepalive.enabled = true;
    config.keepalive.interval_secs = 60;
    config.keepalive.min_interval_secs = 30;
    config.keepalive.domains = vec![
        KeepaliveDomain::new("api.example.com", StackMode::V4),
        KeepaliveDomain::new("img.example.com", StackMode::Dual),
    ];
    config
}

#[tokio::test]
async fn tick_resolves_every_keepalive_domain_in_one_pass() {
    let harness = Harness::new(keepalive_config());
    let scheduler = KeepaliveScheduler::new(harness.coordinator.clone());

    let report = scheduler.tick().await;
    assert_eq!(report.refreshed, 2);
    assert_eq!(report.skipped, 0);

    // One request per stack mode
    assert_eq!(harness.transport.call_count(), 2);
    assert!(harness.coordinator.cache().get("api.example.com", StackMode::V4).0.is_some());
    assert!(harness.coordinator.cache().get("img.example.com", StackMode::Dual).0.is_some());
}

#[tokio::test]
async fn min_interval_guards_against_useless_traffic() {
    let harness = Harness::new(keepalive_config());
    let scheduler = KeepaliveScheduler::new(harness.coordinator.clone());

    scheduler.tick().await;
    harness.clock.advance_secs(20);
    let report = scheduler.tick().await;
    assert_eq!(report.skipped, 2);
    assert_eq!(harness.transport.call_count(), 2);

    harness.clock.advance_secs(20);
    let report = scheduler.tick().await;
    assert_eq!(report.refreshed, 2);
    assert_eq!(harness.transport.call_count(), 4);
}

#[tokio::test]
async fn failed_refresh_is_reported() {
    let harness = Harness::new(keepalive_config());
    harness.transport.set_all_servers(ServerMode::Down);
    let scheduler = KeepaliveScheduler::new(harness.coordinator.clone());

    let report = scheduler.tick().await;
    assert_eq!(report.refreshed, 0);
    assert_eq!(report.failed, 2);
}

#[tokio::test(start_paused = true)]
async fn runs_on_cadence_until_shutdown() {
    let mut harness = Harness::new(keepalive_config());
    let scheduler = KeepaliveScheduler::new(harness.coordinator.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        scheduler.run_with_shutdown(Some(shutdown_rx)).await;
    });

    // Ticks at 0s, 60s and 120s
    tokio::time::sleep(Duration::from_secs(130)).await;
    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("Scheduler should stop promptly")
        .unwrap();

    let ticks = harness
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, ResolverEvent::KeepaliveTick { .. }))
        .count();
    assert_eq!(ticks, 3);

    // The manual clock never moved: only the first tick went to the network
    assert_eq!(harness.transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn disabled_keepalive_sends_nothing() {
    let mut config = keepalive_config();
    config.keepalive.enabled = false;
    let harness = Harness::new(config);
    let scheduler = KeepaliveScheduler::new(harness.coordinator.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        scheduler.run_with_shutdown(Some(shutdown_rx)).await;
    });

    tokio::time::sleep(Duration::from_secs(300)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    assert_eq!(harness.transport.call_count(), 0);
}
