//! Domain cache
//!
//! Maps `(domain, stack mode)` to the latest [`ResolutionRecord`] and
//! classifies records by age:
//!
//! ```text
//!  fetched_at        refresh_ratio * ttl            ttl
//!      |------- Fresh -------|--- StaleRefreshDue ---|--- Expired --->
//! ```
//!
//! Reads never wait on I/O. Writes are ordered by `fetched_at`: a record
//! older than the cached one is rejected, so a slow resolution that completes
//! late cannot overwrite a newer answer. When persistence is enabled every
//! accepted write is forwarded to the [`CacheStore`].
//!
//! Every [`invalidate_all`](DomainCache::invalidate_all) starts a new
//! generation. A resolution that began before the invalidation writes with
//! [`put_in_generation`](DomainCache::put_in_generation) and is rejected, so
//! an answer obtained on the previous network never lands in the cache.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::error::Result;
use crate::record::{
    CacheKey, Freshness, ResolutionRecord, StackMode, normalize_domain, saturating_add,
    saturating_secs,
};
use crate::traits::CacheStore;

/// Keyed store of resolution records with TTL semantics
pub struct DomainCache {
    records: RwLock<HashMap<CacheKey, ResolutionRecord>>,
    /// Serializes writers so the store sees updates in cache order
    write_lock: tokio::sync::Mutex<()>,
    /// Bumped by every invalidation
    generation: AtomicU64,
    config: ConfigHandle,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn CacheStore>>,
}

impl DomainCache {
    /// Create an empty cache
    ///
    /// `store` is only written to while `cache.persist_enabled` is set.
    pub fn new(
        config: ConfigHandle,
        clock: Arc<dyn Clock>,
        store: Option<Arc<dyn CacheStore>>,
    ) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            config,
            clock,
            store,
        }
    }

    /// Look up a record and classify it at the current time
    ///
    /// `domain` is normalized first; an invalid name is simply absent.
    pub fn get(&self, domain: &str, stack: StackMode) -> (Option<ResolutionRecord>, Freshness) {
        match normalize_domain(domain) {
            Ok(domain) => self.get_key(&CacheKey::new(domain, stack)),
            Err(_) => (None, Freshness::Absent),
        }
    }

    /// Look up a record by key and classify it at the current time
    pub fn get_key(&self, key: &CacheKey) -> (Option<ResolutionRecord>, Freshness) {
        let now = self.clock.now();
        let ratio = self.config.snapshot().cache.refresh_ratio;
        match self.records.read().get(key) {
            Some(record) => {
                let freshness = record.freshness(now, ratio);
                (Some(record.clone()), freshness)
            }
            None => (None, Freshness::Absent),
        }
    }

    /// Freshness of a key at an arbitrary instant
    pub fn freshness_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Freshness {
        let ratio = self.config.snapshot().cache.refresh_ratio;
        self.records
            .read()
            .get(key)
            .map_or(Freshness::Absent, |r| r.freshness(now, ratio))
    }

    /// Whether a key needs a resolution at `now`
    pub fn should_refresh(&self, domain: &str, stack: StackMode, now: DateTime<Utc>) -> bool {
        let Ok(domain) = normalize_domain(domain) else {
            return true;
        };
        !matches!(
            self.freshness_at(&CacheKey::new(domain, stack), now),
            Freshness::Fresh
        )
    }

    /// Whether the cached record for `key` was fetched less than `within` ago
    pub fn fetched_within(&self, key: &CacheKey, within: Duration) -> bool {
        let now = self.clock.now();
        self.records
            .read()
            .get(key)
            .is_some_and(|r| r.age(now) < within)
    }

    /// Store a record, replacing any older one
    ///
    /// # Returns
    ///
    /// `true` if the record was accepted, `false` if a record with a newer
    /// `fetched_at` is already cached
    pub async fn put(&self, key: &CacheKey, record: ResolutionRecord) -> bool {
        self.put_in_generation(key, record, self.generation()).await
    }

    /// Current invalidation generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Store a record obtained during `generation`
    ///
    /// Rejected (returns `false`) when the cache was invalidated since, or
    /// when a newer record is already cached.
    pub async fn put_in_generation(
        &self,
        key: &CacheKey,
        record: ResolutionRecord,
        generation: u64,
    ) -> bool {
        let _guard = self.write_lock.lock().await;

        if self.generation() != generation {
            debug!("Dropping result for {} resolved before the last invalidation", key);
            return false;
        }

        {
            let mut records = self.records.write();
            if let Some(existing) = records.get(key)
                && existing.fetched_at > record.fetched_at
            {
                debug!(
                    "Rejecting out-of-order update for {} (cached {}, incoming {})",
                    key, existing.fetched_at, record.fetched_at
                );
                return false;
            }
            records.insert(key.clone(), record.clone());
        }

        if let Some(store) = self.persistent_store()
            && let Err(e) = store.put(&key.to_string(), &record).await
        {
            warn!("Failed to persist cache record {}: {}", key, e);
        }

        true
    }

    /// Drop every record (memory and persisted)
    pub async fn invalidate_all(&self) {
        let _guard = self.write_lock.lock().await;

        self.generation.fetch_add(1, Ordering::SeqCst);
        let dropped = {
            let mut records = self.records.write();
            let count = records.len();
            records.clear();
            count
        };
        info!("Domain cache invalidated ({} record(s) dropped)", dropped);

        if let Some(store) = self.store.as_ref()
            && let Err(e) = store.clear().await
        {
            warn!("Failed to clear persisted cache: {}", e);
        }
    }

    /// Record to hand out when a resolution failed
    ///
    /// Usable records are always eligible. Expired records are eligible only
    /// while `expired_ip_enabled` is set and the record is inside the
    /// configured grace window.
    pub fn fallback(&self, key: &CacheKey) -> Option<ResolutionRecord> {
        let config = self.config.snapshot();
        let now = self.clock.now();
        let records = self.records.read();
        let record = records.get(key)?;

        match record.freshness(now, config.cache.refresh_ratio) {
            Freshness::Fresh | Freshness::StaleRefreshDue => Some(record.clone()),
            Freshness::Expired
                if config.cache.expired_ip_enabled
                    && record.within_grace(now, config.cache.expired_ip_grace_secs) =>
            {
                Some(record.clone())
            }
            _ => None,
        }
    }

    /// Load persisted records
    ///
    /// Records older than `ttl + persist_grace_secs` are discarded (and
    /// removed from the store). Does nothing unless persistence is enabled.
    ///
    /// # Returns
    ///
    /// Number of records loaded into memory
    pub async fn load_persisted(&self) -> Result<usize> {
        let Some(store) = self.persistent_store() else {
            return Ok(0);
        };

        let grace = saturating_secs(self.config.snapshot().cache.persist_grace_secs);
        let now = self.clock.now();

        let persisted = store.load_all().await?;
        let mut loaded = 0;
        let mut discarded = Vec::new();

        {
            let mut records = self.records.write();
            for (raw_key, record) in persisted {
                let key = match raw_key.parse::<CacheKey>() {
                    Ok(key) => key,
                    Err(e) => {
                        warn!("Skipping persisted record with bad key {}: {}", raw_key, e);
                        discarded.push(raw_key);
                        continue;
                    }
                };

                if record.ips.is_empty() || now >= saturating_add(record.expires_at(), grace) {
                    debug!("Discarding expired persisted record {}", key);
                    discarded.push(raw_key);
                    continue;
                }

                let newer_cached = records
                    .get(&key)
                    .is_some_and(|existing| existing.fetched_at > record.fetched_at);
                if !newer_cached {
                    records.insert(key, record);
                    loaded += 1;
                }
            }
        }

        for raw_key in discarded {
            if let Err(e) = store.remove(&raw_key).await {
                warn!("Failed to remove persisted record {}: {}", raw_key, e);
            }
        }

        info!("Loaded {} persisted record(s)", loaded);
        Ok(loaded)
    }

    /// Flush the store, if any
    pub async fn flush(&self) -> Result<()> {
        match self.store.as_ref() {
            Some(store) => store.flush().await,
            None => Ok(()),
        }
    }

    /// Number of cached records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn persistent_store(&self) -> Option<&Arc<dyn CacheStore>> {
        if self.config.snapshot().cache.persist_enabled {
            self.store.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{Credentials, HttpDnsConfig};
    use crate::store::MemoryCacheStore;

    fn config() -> HttpDnsConfig {
        HttpDnsConfig::new(Credentials::new("app", 1, "key"), "119.29.29.98")
    }

    fn record(ip: &str, fetched_at: DateTime<Utc>, ttl: u64) -> ResolutionRecord {
        ResolutionRecord::new(vec![ip.parse().unwrap()], fetched_at, ttl, StackMode::V4).unwrap()
    }

    fn cache_with(config: HttpDnsConfig, store: Option<Arc<dyn CacheStore>>) -> (DomainCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = DomainCache::new(ConfigHandle::new(config).unwrap(), clock.clone(), store);
        (cache, clock)
    }

    #[tokio::test]
    async fn freshness_moves_through_states() {
        let (cache, clock) = cache_with(config(), None);
        let key = CacheKey::new("example.com", StackMode::V4);

        assert_eq!(cache.get_key(&key).1, Freshness::Absent);
        assert!(cache.should_refresh("example.com", StackMode::V4, clock.now()));

        cache.put(&key, record("1.2.3.4", clock.now(), 600)).await;
        assert_eq!(cache.get_key(&key).1, Freshness::Fresh);
        assert!(!cache.should_refresh("example.com", StackMode::V4, clock.now()));

        clock.advance_secs(451);
        assert_eq!(cache.get_key(&key).1, Freshness::StaleRefreshDue);

        clock.advance_secs(150);
        assert_eq!(cache.get_key(&key).1, Freshness::Expired);
    }

    #[tokio::test]
    async fn older_records_never_overwrite_newer_ones() {
        let (cache, clock) = cache_with(config(), None);
        let key = CacheKey::new("example.com", StackMode::V4);
        let t0 = clock.now();

        assert!(cache.put(&key, record("2.2.2.2", t0 + Duration::seconds(10), 600)).await);
        assert!(!cache.put(&key, record("1.1.1.1", t0, 600)).await);

        let (cached, _) = cache.get_key(&key);
        assert_eq!(cached.unwrap().ips, vec!["2.2.2.2".parse::<std::net::IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn domain_lookups_are_normalized() {
        let (cache, clock) = cache_with(config(), None);
        let key = CacheKey::new("www.example.com", StackMode::V4);
        cache.put(&key, record("1.2.3.4", clock.now(), 600)).await;

        assert_eq!(cache.get("WWW.Example.com.", StackMode::V4).1, Freshness::Fresh);
        assert!(!cache.should_refresh(" www.EXAMPLE.com ", StackMode::V4, clock.now()));
        assert_eq!(cache.get("bad..name", StackMode::V4).1, Freshness::Absent);
        assert!(cache.should_refresh("bad..name", StackMode::V4, clock.now()));
    }

    #[tokio::test]
    async fn writes_from_before_an_invalidation_are_rejected() {
        let (cache, clock) = cache_with(config(), None);
        let key = CacheKey::new("example.com", StackMode::V4);

        let generation = cache.generation();
        cache.invalidate_all().await;
        assert!(!cache.put_in_generation(&key, record("1.1.1.1", clock.now(), 600), generation).await);
        assert!(cache.is_empty());

        assert!(cache.put_in_generation(&key, record("2.2.2.2", clock.now(), 600), cache.generation()).await);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn invalidate_all_empties_memory_and_store() {
        let store = MemoryCacheStore::new();
        let mut cfg = config();
        cfg.cache.persist_enabled = true;
        let (cache, clock) = cache_with(cfg, Some(Arc::new(store.clone())));

        let key = CacheKey::new("example.com", StackMode::V4);
        cache.put(&key, record("1.2.3.4", clock.now(), 600)).await;
        assert_eq!(store.len().await, 1);

        cache.invalidate_all().await;
        assert!(cache.is_empty());
        assert!(store.is_empty().await);
        assert_eq!(cache.get_key(&key).1, Freshness::Absent);
    }

    #[tokio::test]
    async fn fallback_respects_expired_ip_flag_and_grace() {
        let mut cfg = config();
        cfg.cache.expired_ip_enabled = true;
        cfg.cache.expired_ip_grace_secs = Some(60);
        let (cache, clock) = cache_with(cfg, None);

        let key = CacheKey::new("example.com", StackMode::V4);
        cache.put(&key, record("1.2.3.4", clock.now(), 600)).await;

        clock.advance_secs(630);
        assert!(cache.fallback(&key).is_some());

        clock.advance_secs(60);
        assert!(cache.fallback(&key).is_none());
    }

    #[tokio::test]
    async fn fallback_refuses_expired_records_when_disabled() {
        let (cache, clock) = cache_with(config(), None);
        let key = CacheKey::new("example.com", StackMode::V4);
        cache.put(&key, record("1.2.3.4", clock.now(), 600)).await;

        clock.advance_secs(601);
        assert!(cache.fallback(&key).is_none());
    }

    #[tokio::test]
    async fn persistence_is_gated_by_flag() {
        let store = MemoryCacheStore::new();
        let (cache, clock) = cache_with(config(), Some(Arc::new(store.clone())));

        let key = CacheKey::new("example.com", StackMode::V4);
        cache.put(&key, record("1.2.3.4", clock.now(), 600)).await;
        assert!(store.is_empty().await);
        assert_eq!(cache.load_persisted().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn load_discards_records_past_grace() {
        let store = MemoryCacheStore::new();
        let clock = Arc::new(ManualClock::new());
        let now = clock.now();

        store
            .put("fresh.com/v4", &record("1.1.1.1", now - Duration::seconds(100), 600))
            .await
            .unwrap();
        store
            .put("old.com/v4", &record("2.2.2.2", now - Duration::seconds(700), 600))
            .await
            .unwrap();

        let mut cfg = config();
        cfg.cache.persist_enabled = true;
        cfg.cache.persist_grace_secs = 60;
        let cache = DomainCache::new(
            ConfigHandle::new(cfg).unwrap(),
            clock.clone(),
            Some(Arc::new(store.clone())),
        );

        assert_eq!(cache.load_persisted().await.unwrap(), 1);
        assert_eq!(cache.get("fresh.com", StackMode::V4).1, Freshness::Fresh);
        assert_eq!(cache.get("old.com", StackMode::V4).1, Freshness::Absent);
        assert!(store.get("old.com/v4").await.is_none());
    }
}
