//! Core traits for the HTTPDNS client
//!
//! This module defines the abstract interfaces the engine is built on.
//!
//! - [`Transport`]: Send one request to one resolution server
//! - [`CacheStore`]: Durable persistence for the domain cache
//! - [`IpRanker`]: Order the addresses of a fresh answer
//! - [`NetworkChangeEvent`]: Connectivity signal that invalidates the cache

pub mod cache_store;
pub mod network;
pub mod ranker;
pub mod transport;

pub use cache_store::CacheStore;
pub use network::{NetworkChangeEvent, NetworkChangeStream, NetworkKind};
pub use ranker::{HintRanker, IpRanker, ResponseOrderRanker};
pub use transport::{Scheme, Transport, TransportRequest};
