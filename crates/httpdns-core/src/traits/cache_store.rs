// # Cache Store Trait
//
// Defines the interface for durable cache persistence.
//
// ## Purpose
//
// The cache store lets resolved records survive process restarts:
// - All records are loaded once at startup
// - Every accepted cache update is written through
// - Invalidation clears the store together with the in-memory cache
//
// ## Implementations
//
// - In-memory: `MemoryCacheStore` (tests, ephemeral deployments)
// - File-based: `FileCacheStore` (JSON file with atomic writes)
//
// ## Usage
//
// ```rust,ignore
// use httpdns_core::traits::CacheStore;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = /* CacheStore implementation */;
//
//     // Load everything persisted by a previous run
//     let records = store.load_all().await?;
//
//     // Write through after a successful resolution
//     store.put("example.com/v4", &record).await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;

use crate::record::ResolutionRecord;

/// Trait for cache store implementations
///
/// Keys are the `Display` form of [`crate::record::CacheKey`]
/// (`domain/stack`). Stores treat them as opaque strings.
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage (files, databases, etc.)
/// - ✅ Implement locking/concurrency control for thread safety
///
/// ## Forbidden Capabilities
/// - ❌ Decide freshness or expiry (owned by `DomainCache`)
/// - ❌ Trigger resolutions (owned by `Coordinator`)
/// - ❌ Spawn background tasks without clear lifecycle
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Load every persisted record
    ///
    /// # Returns
    ///
    /// - `Ok(HashMap)`: Records keyed by cache key string
    /// - `Err(Error)`: Storage error
    async fn load_all(&self) -> Result<HashMap<String, ResolutionRecord>, crate::Error>;

    /// Insert or replace a record
    ///
    /// # Parameters
    ///
    /// - `key`: Cache key string
    /// - `record`: The record to persist
    async fn put(&self, key: &str, record: &ResolutionRecord) -> Result<(), crate::Error>;

    /// Delete a record (no-op if absent)
    async fn remove(&self, key: &str) -> Result<(), crate::Error>;

    /// Delete every record
    async fn clear(&self) -> Result<(), crate::Error>;

    /// Persist any pending changes
    ///
    /// Some implementations may buffer writes. This ensures
    /// all changes are flushed to persistent storage.
    async fn flush(&self) -> Result<(), crate::Error>;
}
