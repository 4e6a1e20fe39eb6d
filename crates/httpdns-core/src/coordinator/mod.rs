//! Resolution coordinator
//!
//! Entry point for callers. Every `(domain, stack)` key moves through
//!
//! ```text
//! Idle --lookup miss / refresh--> InFlight --+--> Resolved --> Idle
//!                                            +--> Failed   --> Idle
//! ```
//!
//! At most one remote resolution is in flight per key. Concurrent lookups for
//! the same key subscribe to the same `watch` channel and observe the same
//! outcome. The resolution itself runs on its own task, so a caller that gives
//! up after `lookup_timeout_ms` does not cancel it: the cache is still updated
//! for the next caller.
//!
//! Freshness decides what a lookup does:
//!
//! - `Fresh`: answered from the cache.
//! - `StaleRefreshDue`: answered from the cache, background refresh started.
//! - `Expired` / `Absent`: the caller waits for the resolution. On failure the
//!   cache fallback policy applies, then the system resolver (if enabled).
//!
//! Invalidation detaches every in-flight resolution: callers already waiting
//! still get its outcome, but its records are not cached and new lookups
//! start over against the new network.

mod local;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::cache::DomainCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigHandle, HttpDnsConfig};
use crate::error::{Error, Result};
use crate::events::{EventSink, ResolverEvent};
use crate::record::{CacheKey, Freshness, ResolutionRecord, StackMode, normalize_domain};
use crate::resolver::Resolver;
use crate::traits::{CacheStore, HintRanker, IpRanker, NetworkChangeEvent, NetworkChangeStream, Transport};

/// Final state of one in-flight resolution
#[derive(Debug, Clone)]
enum Outcome {
    Resolved(ResolutionRecord),
    Failed(String),
}

type OutcomeRx = watch::Receiver<Option<Outcome>>;
type OutcomeTx = watch::Sender<Option<Outcome>>;

/// Registered in-flight resolution of one key
struct Flight {
    id: u64,
    rx: OutcomeRx,
}

/// Leader side of a flight
struct Leader {
    key: CacheKey,
    id: u64,
    tx: OutcomeTx,
}

/// Deduplicating front end over the cache and the resolver
///
/// Cheap to clone; clones share the cache, the failover state and the
/// in-flight table.
///
/// ## Lifecycle
///
/// 1. Create with [`Coordinator::new`] (or [`Coordinator::from_parts`])
/// 2. Optionally [`load_persisted`](Coordinator::load_persisted) and
///    [`pre_resolve`](Coordinator::pre_resolve)
/// 3. Serve [`lookup`](Coordinator::lookup) /
///    [`lookup_batch`](Coordinator::lookup_batch) calls
/// 4. [`flush`](Coordinator::flush) before exit
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConfigHandle,
    cache: DomainCache,
    resolver: Resolver,
    events: EventSink,
    in_flight: Mutex<HashMap<CacheKey, Flight>>,
    next_flight: AtomicU64,
}

impl Coordinator {
    /// Create a coordinator with the system clock and hint-based ranking
    ///
    /// # Parameters
    ///
    /// - `config`: HTTPDNS configuration (validated here)
    /// - `transport`: Transport towards the resolution service
    /// - `store`: Durable cache store, used when persistence is enabled
    ///
    /// # Returns
    ///
    /// A tuple of (coordinator, event_receiver)
    pub fn new(
        config: HttpDnsConfig,
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn CacheStore>>,
    ) -> Result<(Self, mpsc::Receiver<ResolverEvent>)> {
        let config = ConfigHandle::new(config)?;
        Ok(Self::from_parts(
            config,
            transport,
            store,
            Arc::new(SystemClock),
            Arc::new(HintRanker),
        ))
    }

    /// Create a coordinator from explicit collaborators
    pub fn from_parts(
        config: ConfigHandle,
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn CacheStore>>,
        clock: Arc<dyn Clock>,
        ranker: Arc<dyn IpRanker>,
    ) -> (Self, mpsc::Receiver<ResolverEvent>) {
        let (events, rx) = EventSink::channel(config.snapshot().event_channel_capacity);

        let cache = DomainCache::new(config.clone(), Arc::clone(&clock), store);
        let resolver = Resolver::new(
            config.clone(),
            transport,
            ranker,
            clock,
            events.clone(),
        );

        let coordinator = Self {
            inner: Arc::new(Inner {
                config,
                cache,
                resolver,
                events,
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
            }),
        };

        (coordinator, rx)
    }

    /// Resolve a domain to an ordered, non-empty address list
    pub async fn lookup(&self, domain: &str, stack: StackMode) -> Result<Vec<IpAddr>> {
        let domain = normalize_domain(domain)?;
        let config = self.inner.config.snapshot();

        if !config.domain_filter.allows(&domain) {
            debug!("{} bypasses HTTPDNS (domain filter)", domain);
            return self.bypass(&domain, stack, &config).await;
        }

        let key = CacheKey::new(domain, stack);
        if let Some(ips) = self.serve_cached(&key) {
            return Ok(ips);
        }

        let mut receivers = self.start(vec![key.clone()]);
        let Some(rx) = receivers.remove(&key) else {
            return self.after_failure(&key, "resolution was not started").await;
        };

        let deadline = Instant::now() + config.lookup_timeout();
        self.settle(&key, rx, deadline).await
    }

    /// Resolve several domains
    ///
    /// Cached answers are served directly; misses share batched requests.
    /// Every input gets an entry, keyed by its normalized name (or the raw
    /// input when it is not a valid domain).
    pub async fn lookup_batch<S: AsRef<str>>(
        &self,
        domains: &[S],
        stack: StackMode,
    ) -> HashMap<String, Result<Vec<IpAddr>>> {
        let config = self.inner.config.snapshot();
        let mut results = HashMap::with_capacity(domains.len());
        let mut misses = Vec::new();

        for raw in domains {
            let raw = raw.as_ref();
            let domain = match normalize_domain(raw) {
                Ok(domain) => domain,
                Err(e) => {
                    results.insert(raw.to_string(), Err(e));
                    continue;
                }
            };
            if results.contains_key(&domain) {
                continue;
            }

            if !config.domain_filter.allows(&domain) {
                let answer = self.bypass(&domain, stack, &config).await;
                results.insert(domain, answer);
                continue;
            }

            let key = CacheKey::new(domain, stack);
            match self.serve_cached(&key) {
                Some(ips) => {
                    results.insert(key.domain, Ok(ips));
                }
                None => misses.push(key),
            }
        }

        if misses.is_empty() {
            return results;
        }

        let deadline = Instant::now() + config.lookup_timeout();
        let mut receivers = self.start(misses.clone());
        for key in misses {
            let answer = match receivers.remove(&key) {
                Some(rx) => self.settle(&key, rx, deadline).await,
                None => continue,
            };
            results.insert(key.domain, answer);
        }

        results
    }

    /// Start a background refresh of a key unless one is in flight
    ///
    /// Returns `true` if a new resolution was started.
    pub fn refresh(&self, domain: &str, stack: StackMode) -> Result<bool> {
        let key = CacheKey::new(normalize_domain(domain)?, stack);
        if self.inner.in_flight.lock().contains_key(&key) {
            return Ok(false);
        }
        self.schedule_refresh(&key);
        Ok(true)
    }

    /// Resolve `keys` now (joining in-flight resolutions) and wait until all
    /// of them settle or `deadline` passes
    ///
    /// # Returns
    ///
    /// Number of keys that resolved successfully
    pub async fn refresh_and_wait(&self, keys: Vec<CacheKey>, deadline: Instant) -> usize {
        let receivers = self.start(keys);
        let mut resolved = 0;
        for (_, rx) in receivers {
            if let Ok(Some(Outcome::Resolved(_))) =
                tokio::time::timeout_at(deadline, wait_outcome(rx)).await
            {
                resolved += 1;
            }
        }
        resolved
    }

    /// Resolve the configured `pre_resolve` domains
    ///
    /// # Returns
    ///
    /// Number of domains resolved
    pub async fn pre_resolve(&self) -> usize {
        let config = self.inner.config.snapshot();
        if config.pre_resolve.is_empty() {
            return 0;
        }

        let keys: Vec<CacheKey> = config
            .pre_resolve
            .iter()
            .filter_map(|d| normalize_domain(d).ok())
            .filter(|d| config.domain_filter.allows(d))
            .map(|d| CacheKey::new(d, config.default_stack))
            .collect();

        info!("Pre-resolving {} domain(s)", keys.len());
        let deadline = Instant::now() + config.lookup_timeout();
        let resolved = self.refresh_and_wait(keys, deadline).await;
        info!("Pre-resolved {} domain(s)", resolved);
        resolved
    }

    /// Drop every cached record and detach in-flight resolutions
    pub async fn invalidate_all(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.inner.cache.invalidate_all().await;
        let detached = {
            let mut in_flight = self.inner.in_flight.lock();
            let count = in_flight.len();
            in_flight.clear();
            count
        };
        info!(
            "Cache invalidated: {} ({} in-flight resolution(s) detached)",
            reason, detached
        );
        self.inner
            .events
            .emit(ResolverEvent::CacheInvalidated { reason });
    }

    /// React to a connectivity change
    ///
    /// Invalidates the cache, then re-resolves the keepalive set in the
    /// background.
    pub async fn on_network_change(&self, event: NetworkChangeEvent) {
        let reason = match event.ssid.as_deref() {
            Some(ssid) => format!("network changed to {:?} ({})", event.kind, ssid),
            None => format!("network changed to {:?}", event.kind),
        };
        self.invalidate_all(reason).await;

        let config = self.inner.config.snapshot();
        if config.keepalive.enabled {
            let keys: Vec<CacheKey> = config
                .keepalive
                .domains
                .iter()
                .filter_map(|entry| {
                    normalize_domain(&entry.domain)
                        .ok()
                        .map(|d| CacheKey::new(d, entry.stack))
                })
                .collect();
            debug!("Re-warming {} keepalive domain(s)", keys.len());
            self.start(keys);
        }
    }

    /// Consume a stream of network changes on a background task
    pub fn watch_network(&self, mut changes: NetworkChangeStream) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            while let Some(event) = changes.next().await {
                coordinator.on_network_change(event).await;
            }
            debug!("Network change stream ended");
        })
    }

    /// Load persisted records into the cache
    pub async fn load_persisted(&self) -> Result<usize> {
        self.inner.cache.load_persisted().await
    }

    /// Flush the durable store
    pub async fn flush(&self) -> Result<()> {
        self.inner.cache.flush().await
    }

    /// The domain cache
    pub fn cache(&self) -> &DomainCache {
        &self.inner.cache
    }

    /// The resolver (failover state, direct resolution)
    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    /// Shared configuration
    pub fn config(&self) -> &ConfigHandle {
        &self.inner.config
    }

    pub(crate) fn events(&self) -> &EventSink {
        &self.inner.events
    }

    /// Number of keys with a resolution in flight
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Answer from the cache if the record is usable
    fn serve_cached(&self, key: &CacheKey) -> Option<Vec<IpAddr>> {
        let (record, freshness) = self.inner.cache.get_key(key);
        let record = record?;
        if !freshness.is_usable() {
            return None;
        }

        debug!("Cache hit for {} ({:?})", key, freshness);
        self.inner.events.emit(ResolverEvent::CacheHit {
            domain: key.domain.clone(),
            stack: key.stack,
            freshness,
        });

        if freshness == Freshness::StaleRefreshDue {
            self.schedule_refresh(key);
        }
        Some(record.ips)
    }

    fn schedule_refresh(&self, key: &CacheKey) {
        if self.inner.in_flight.lock().contains_key(key) {
            return;
        }
        debug!("Scheduling background refresh for {}", key);
        self.inner.events.emit(ResolverEvent::RefreshScheduled {
            domain: key.domain.clone(),
            stack: key.stack,
        });
        self.start(vec![key.clone()]);
    }

    /// Join in-flight resolutions or start new ones
    ///
    /// New keys are grouped by stack mode and resolved in batches on spawned
    /// tasks. Returns a receiver for every distinct key.
    fn start(&self, keys: Vec<CacheKey>) -> HashMap<CacheKey, OutcomeRx> {
        let mut receivers = HashMap::with_capacity(keys.len());
        let mut pending: HashMap<StackMode, Vec<Leader>> = HashMap::new();

        {
            let mut in_flight = self.inner.in_flight.lock();
            for key in keys {
                if receivers.contains_key(&key) {
                    continue;
                }

                // A closed channel means the leader task died; start over
                if let Some(flight) = in_flight.get(&key)
                    && flight.rx.has_changed().is_ok()
                {
                    receivers.insert(key, flight.rx.clone());
                    continue;
                }

                let (tx, rx) = watch::channel(None);
                let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                in_flight.insert(key.clone(), Flight { id, rx: rx.clone() });
                receivers.insert(key.clone(), rx);
                pending
                    .entry(key.stack)
                    .or_default()
                    .push(Leader { key, id, tx });
            }
        }

        for (stack, batch) in pending {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.resolve_and_publish(batch, stack).await;
            });
        }

        receivers
    }

    /// Wait for an outcome and apply the failure policy
    async fn settle(&self, key: &CacheKey, rx: OutcomeRx, deadline: Instant) -> Result<Vec<IpAddr>> {
        match tokio::time::timeout_at(deadline, wait_outcome(rx)).await {
            Ok(Some(Outcome::Resolved(record))) => Ok(record.ips),
            Ok(Some(Outcome::Failed(reason))) => self.after_failure(key, &reason).await,
            Ok(None) => {
                self.after_failure(key, "resolution ended without a result")
                    .await
            }
            Err(_) => {
                warn!("Timed out waiting for resolution of {}", key);
                self.after_failure(key, "timed out waiting for resolution")
                    .await
            }
        }
    }

    /// Cached fallback, then the system resolver, then `NoCachedFallback`
    async fn after_failure(&self, key: &CacheKey, reason: &str) -> Result<Vec<IpAddr>> {
        if let Some(record) = self.inner.cache.fallback(key) {
            warn!("Serving stale record for {} after failure: {}", key, reason);
            self.inner.events.emit(ResolverEvent::StaleServed {
                domain: key.domain.clone(),
                stack: key.stack,
            });
            return Ok(record.ips);
        }

        let config = self.inner.config.snapshot();
        if config.local_dns_fallback {
            match local::lookup(&key.domain, key.stack).await {
                Ok(ips) => {
                    info!("Resolved {} through the system resolver", key);
                    self.inner.events.emit(ResolverEvent::LocalDnsServed {
                        domain: key.domain.clone(),
                    });
                    return Ok(ips);
                }
                Err(e) => warn!("System resolver failed for {}: {}", key, e),
            }
        }

        Err(Error::no_cached_fallback(&key.domain, reason))
    }

    /// Domains excluded by the filter go to the system resolver or fail
    async fn bypass(
        &self,
        domain: &str,
        stack: StackMode,
        config: &HttpDnsConfig,
    ) -> Result<Vec<IpAddr>> {
        if !config.local_dns_fallback {
            return Err(Error::no_cached_fallback(
                domain,
                "excluded by domain filter and local DNS fallback is disabled",
            ));
        }

        let ips = local::lookup(domain, stack).await?;
        self.inner.events.emit(ResolverEvent::LocalDnsServed {
            domain: domain.to_string(),
        });
        Ok(ips)
    }
}

impl Inner {
    /// Leader side of an in-flight resolution
    async fn resolve_and_publish(&self, batch: Vec<Leader>, stack: StackMode) {
        let generation = self.cache.generation();
        let domains: Vec<String> = batch.iter().map(|l| l.key.domain.clone()).collect();
        let mut results = self.resolver.resolve_batch(&domains, stack).await;

        for Leader { key, id, tx } in batch {
            let outcome = match results.remove(&key.domain) {
                Some(Ok(record)) => {
                    if self
                        .cache
                        .put_in_generation(&key, record.clone(), generation)
                        .await
                    {
                        info!("Resolved {} -> {:?} (ttl {}s)", key, record.ips, record.ttl_secs);
                        self.events.emit(ResolverEvent::Resolved {
                            domain: key.domain.clone(),
                            stack: key.stack,
                            ips: record.ips.clone(),
                            ttl_secs: record.ttl_secs,
                        });
                    }
                    Outcome::Resolved(record)
                }
                Some(Err(e)) => {
                    warn!("Resolution of {} failed: {}", key, e);
                    self.events.emit(ResolverEvent::ResolutionFailed {
                        domain: key.domain.clone(),
                        stack: key.stack,
                        error: e.to_string(),
                    });
                    Outcome::Failed(e.to_string())
                }
                None => Outcome::Failed("no result for domain".to_string()),
            };

            // Fails only when nobody waits on a detached flight
            let _ = tx.send(Some(outcome));

            let mut in_flight = self.in_flight.lock();
            if in_flight.get(&key).is_some_and(|flight| flight.id == id) {
                in_flight.remove(&key);
            }
        }
    }
}

async fn wait_outcome(mut rx: OutcomeRx) -> Option<Outcome> {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => None,
    }
}
