//! Events emitted by the resolution engine
//!
//! Events are delivered on a bounded channel for monitoring and tests. A full
//! channel drops the event with a warning; event delivery never slows down a
//! lookup.

use std::net::IpAddr;
use tokio::sync::mpsc;
use tracing::warn;

use crate::record::{Freshness, StackMode};

/// Events emitted by the coordinator, resolver and keepalive scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverEvent {
    /// Lookup answered from the cache
    CacheHit {
        domain: String,
        stack: StackMode,
        freshness: Freshness,
    },

    /// Background refresh started for a key
    RefreshScheduled { domain: String, stack: StackMode },

    /// Resolution succeeded and the cache accepted the record
    Resolved {
        domain: String,
        stack: StackMode,
        ips: Vec<IpAddr>,
        ttl_secs: u64,
    },

    /// Resolution failed for a key
    ResolutionFailed {
        domain: String,
        stack: StackMode,
        error: String,
    },

    /// An expired record was served after a failed resolution
    StaleServed { domain: String, stack: StackMode },

    /// The operating system resolver answered instead of HTTPDNS
    LocalDnsServed { domain: String },

    /// Failover moved to another server
    ServerSwitched {
        from: String,
        to: String,
        failures: u32,
    },

    /// Failover returned to the primary after its cool-down
    SwitchedBackToPrimary { server: String },

    /// Every cached record was dropped
    CacheInvalidated { reason: String },

    /// Keepalive pass finished
    KeepaliveTick { refreshed: usize, skipped: usize },
}

/// Cloneable, non-blocking event sender
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ResolverEvent>>,
}

impl EventSink {
    /// Create a sink and the matching receiver
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ResolverEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit an event
    pub fn emit(&self, event: ResolverEvent) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "Event channel full, dropping event. Consider increasing event_channel_capacity."
                );
            }
            // Receiver dropped: nobody is listening
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
