//! Keepalive scheduler
//!
//! Re-resolves the configured keepalive domains on a fixed cadence, whatever
//! their freshness, so the first lookup of a latency-critical domain never
//! waits on the network. A domain fetched within `min_interval_secs` is
//! skipped.
//!
//! The scheduler reads the keepalive settings on every tick, so changes made
//! through the [`ConfigHandle`](crate::config::ConfigHandle) apply without a
//! restart.

use std::time::Duration as StdDuration;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::coordinator::Coordinator;
use crate::events::ResolverEvent;
use crate::record::{CacheKey, normalize_domain, saturating_secs};

/// Summary of one keepalive pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Keys re-resolved successfully
    pub refreshed: usize,
    /// Keys skipped because they were fetched recently
    pub skipped: usize,
    /// Keys whose resolution failed or did not finish in time
    pub failed: usize,
}

/// Background loop keeping the keepalive set warm
pub struct KeepaliveScheduler {
    coordinator: Coordinator,
}

impl KeepaliveScheduler {
    /// Create a scheduler driving `coordinator`
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    /// Run one keepalive pass and wait for its resolutions
    pub async fn tick(&self) -> TickReport {
        let config = self.coordinator.config().snapshot();
        let min_interval = saturating_secs(config.keepalive.min_interval_secs);

        let mut due = Vec::new();
        let mut skipped = 0;
        for entry in &config.keepalive.domains {
            let Ok(domain) = normalize_domain(&entry.domain) else {
                continue;
            };
            let key = CacheKey::new(domain, entry.stack);
            if due.contains(&key) {
                continue;
            }

            if self.coordinator.cache().fetched_within(&key, min_interval) {
                debug!("Keepalive skipping {}, fetched recently", key);
                skipped += 1;
            } else {
                due.push(key);
            }
        }

        let attempted = due.len();
        let refreshed = if due.is_empty() {
            0
        } else {
            let deadline = Instant::now() + config.lookup_timeout();
            self.coordinator.refresh_and_wait(due, deadline).await
        };

        let report = TickReport {
            refreshed,
            skipped,
            failed: attempted - refreshed,
        };
        debug!(
            "Keepalive tick: {} refreshed, {} skipped, {} failed",
            report.refreshed, report.skipped, report.failed
        );
        self.coordinator.events().emit(ResolverEvent::KeepaliveTick {
            refreshed: report.refreshed,
            skipped: report.skipped,
        });

        report
    }

    /// Run until SIGINT
    pub async fn run(&self) {
        self.run_with_shutdown(None).await
    }

    /// Run until the shutdown signal fires (or SIGINT when `None`)
    ///
    /// The first pass runs immediately. Passes that fall behind are skipped,
    /// not bunched up.
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) {
        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        };
        tokio::pin!(shutdown);

        let mut period = self.interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Keepalive scheduler started (every {}s)", period.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.coordinator.config().snapshot().keepalive.enabled {
                        self.tick().await;
                    }

                    let current = self.interval();
                    if current != period {
                        info!("Keepalive interval changed to {}s", current.as_secs());
                        period = current;
                        ticker = tokio::time::interval_at(Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    }
                }

                _ = &mut shutdown => {
                    info!("Keepalive scheduler stopped");
                    break;
                }
            }
        }
    }

    fn interval(&self) -> StdDuration {
        StdDuration::from_secs(
            self.coordinator
                .config()
                .snapshot()
                .keepalive
                .interval_secs
                .max(1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{ConfigHandle, Credentials, HttpDnsConfig, KeepaliveDomain};
    use crate::error::Result;
    use crate::record::StackMode;
    use crate::traits::{HintRanker, Transport, TransportRequest};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, _request: &TransportRequest, _timeout: StdDuration) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(b"10.0.0.1,600".to_vec())
        }

        fn transport_name(&self) -> &'static str {
            "counting"
        }
    }

    fn scheduler() -> (KeepaliveScheduler, Arc<CountingTransport>, Arc<ManualClock>) {
        let mut config = HttpDnsConfig::new(Credentials::new("app", 1000, "key"), "primary");
        config.keepalive.enabled = true;
        config.keepalive.domains = vec![KeepaliveDomain::new("api.example.com", StackMode::V4)];

        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::new());
        let (coordinator, _events) = Coordinator::from_parts(
            ConfigHandle::new(config).unwrap(),
            transport.clone(),
            None,
            clock.clone(),
            Arc::new(HintRanker),
        );
        (KeepaliveScheduler::new(coordinator), transport, clock)
    }

    #[tokio::test]
    async fn refreshes_fresh_domains_outside_min_interval() {
        let (scheduler, transport, clock) = scheduler();

        let first = scheduler.tick().await;
        assert_eq!(first.refreshed, 1);

        // Still fresh and inside the guard: skipped
        clock.advance_secs(10);
        let second = scheduler.tick().await;
        assert_eq!(second.skipped, 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        // Still fresh, but past the guard: refreshed anyway
        clock.advance_secs(30);
        let third = scheduler.tick().await;
        assert_eq!(third.refreshed, 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stops_on_shutdown_signal() {
        let (scheduler, _transport, _clock) = scheduler();
        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();

        tokio::time::timeout(StdDuration::from_secs(5), scheduler.run_with_shutdown(Some(rx)))
            .await
            .expect("scheduler should stop");
    }
}
