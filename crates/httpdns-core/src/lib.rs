// # httpdns-core
//
// Core library of the HTTPDNS client: domain resolution over HTTP(S)
// requests to a dedicated service instead of the DNS protocol.
//
// ## Architecture Overview
//
// - **DomainCache**: `(domain, stack)` -> record, with refresh-ahead freshness
// - **Resolver**: encrypted requests to the active server, failover on soft
//   failures
// - **Coordinator**: caller entry point; at most one remote resolution in
//   flight per key, stale fallback policy
// - **KeepaliveScheduler**: keeps a configured domain set warm
// - **Transport** / **CacheStore** / **IpRanker**: pluggable collaborators
//
// ## Design Principles
//
// 1. **Explicit configuration**: a validated value handed over at
//    construction, snapshotted per attempt
// 2. **Never empty**: callers get a non-empty address list or an error
// 3. **Library-First**: the daemon is a thin wrapper over this crate

pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod keepalive;
pub mod record;
pub mod resolver;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use cache::DomainCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CacheConfig, ConfigHandle, Credentials, DomainFilter, EncryptionMode, FailoverConfig,
    HttpDnsConfig, KeepaliveConfig, KeepaliveDomain, ServerConfig,
};
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use events::{EventSink, ResolverEvent};
pub use keepalive::{KeepaliveScheduler, TickReport};
pub use record::{CacheKey, Freshness, ResolutionRecord, StackMode, normalize_domain};
pub use resolver::Resolver;
pub use store::{FileCacheStore, MemoryCacheStore};
pub use traits::{
    CacheStore, HintRanker, IpRanker, NetworkChangeEvent, NetworkChangeStream, NetworkKind,
    ResponseOrderRanker, Scheme, Transport, TransportRequest,
};
