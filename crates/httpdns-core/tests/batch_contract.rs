//! Contract Test: Batch Resolution
//!
//! Misses of a batch lookup share outbound requests of at most `batch_size`
//! domains. A domain the service did not answer fails on its own; a batch
//! whose request failed on every server fails for each of its domains, and
//! each domain then falls back to the cache policy individually.

mod common;

use common::*;
use httpdns_core::error::Error;
use httpdns_core::StackMode;

#[tokio::test]
async fn misses_are_chunked_by_batch_size() {
    let mut config = test_config();
    config.batch_size = 2;
    let harness = Harness::new(config);

    let domains = ["a.com", "b.com", "c.com", "d.com", "e.com"];
    let results = harness
        .coordinator
        .lookup_batch(&domains, StackMode::V4)
        .await;

    assert_eq!(results.len(), 5);
    assert!(results.values().all(|r| r.is_ok()));
    assert_eq!(harness.transport.call_count(), 3);
    assert!(harness.transport.calls().iter().all(|c| c.domains.len() <= 2));
}

#[tokio::test]
async fn cached_domains_are_not_requested_again() {
    let harness = Harness::new(test_config());
    harness.coordinator.lookup("a.com", StackMode::V4).await.unwrap();

    let results = harness
        .coordinator
        .lookup_batch(&["a.com", "b.com"], StackMode::V4)
        .await;

    assert!(results["a.com"].is_ok());
    assert!(results["b.com"].is_ok());
    assert_eq!(harness.transport.call_count(), 2);
    assert_eq!(harness.transport.calls()[1].domains, vec!["b.com"]);
}

#[tokio::test]
async fn unanswered_domain_fails_alone() {
    let harness = Harness::new(test_config());
    harness.transport.set_answer("gone.com", "0");

    let results = harness
        .coordinator
        .lookup_batch(&["ok.com", "gone.com"], StackMode::V4)
        .await;

    assert_eq!(results["ok.com"].as_ref().unwrap(), &vec![ip("10.0.0.1")]);
    assert!(matches!(results["gone.com"], Err(Error::NoCachedFallback { .. })));
    assert_eq!(harness.transport.call_count(), 1);
}

#[tokio::test]
async fn failed_batch_falls_back_per_domain() {
    let mut config = test_config();
    config.cache.expired_ip_enabled = true;
    let harness = Harness::new(config);

    harness.coordinator.lookup("old.com", StackMode::V4).await.unwrap();
    harness.clock.advance_secs(700);
    harness.transport.set_all_servers(ServerMode::Down);

    let results = harness
        .coordinator
        .lookup_batch(&["old.com", "new.com"], StackMode::V4)
        .await;

    assert_eq!(results["old.com"].as_ref().unwrap(), &vec![ip("10.0.0.1")]);
    assert!(matches!(results["new.com"], Err(Error::NoCachedFallback { .. })));
}

#[tokio::test]
async fn pre_resolve_warms_configured_domains() {
    let mut config = test_config();
    config.pre_resolve = vec!["a.com".into(), "b.com".into(), "C.com.".into()];
    let harness = Harness::new(config);

    assert_eq!(harness.coordinator.pre_resolve().await, 3);
    assert_eq!(harness.transport.call_count(), 1);

    for domain in ["a.com", "b.com", "c.com"] {
        harness.coordinator.lookup(domain, StackMode::V4).await.unwrap();
    }
    assert_eq!(harness.transport.call_count(), 1);
}
