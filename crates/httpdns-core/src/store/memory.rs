// # Memory Cache Store
//
// In-memory implementation of CacheStore.
//
// ## Purpose
//
// Provides a store that doesn't persist across restarts. Useful for
// testing, or for exercising the persistence path without touching disk.
//
// ## Crash Behavior
//
// - All records are lost on restart/crash
// - First lookups after a restart are hard misses

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::record::ResolutionRecord;
use crate::traits::CacheStore;

/// In-memory cache store implementation
///
/// This implementation stores all records in a HashMap protected by a RwLock.
/// Clones share the same underlying map.
///
/// # Example
///
/// ```rust,no_run
/// use httpdns_core::store::MemoryCacheStore;
/// use httpdns_core::traits::CacheStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryCacheStore::new();
///     let records = store.load_all().await?;
///     assert!(records.is_empty());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    inner: Arc<RwLock<HashMap<String, ResolutionRecord>>>,
}

impl MemoryCacheStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Get a single record
    pub async fn get(&self, key: &str) -> Option<ResolutionRecord> {
        self.inner.read().await.get(key).cloned()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load_all(&self) -> Result<HashMap<String, ResolutionRecord>, Error> {
        Ok(self.inner.read().await.clone())
    }

    async fn put(&self, key: &str, record: &ResolutionRecord) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.inner.write().await.clear();
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing buffered
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StackMode;

    fn record(ip: &str) -> ResolutionRecord {
        ResolutionRecord::new(vec![ip.parse().unwrap()], chrono::Utc::now(), 600, StackMode::V4)
            .unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryCacheStore::new();
        assert!(store.is_empty().await);

        store.put("example.com/v4", &record("1.2.3.4")).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.get("example.com/v4").await.unwrap().ips,
            vec!["1.2.3.4".parse::<std::net::IpAddr>().unwrap()]
        );

        store.remove("example.com/v4").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_store_clear() {
        let store = MemoryCacheStore::new();
        store.put("a.com/v4", &record("1.1.1.1")).await.unwrap();
        store.put("b.com/v4", &record("2.2.2.2")).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
