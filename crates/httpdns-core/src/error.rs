//! Error types for the HTTPDNS client
//!
//! This module defines all error types used throughout the crate.
//!
//! Per-attempt failures ([`Error::Timeout`], [`Error::MalformedResponse`],
//! [`Error::Transport`], [`Error::Encryption`]) are consumed by the resolver's
//! failover logic. Only [`Error::AllServersExhausted`] leaves the resolver, and
//! the coordinator turns it into [`Error::NoCachedFallback`] once every
//! fallback has been tried.

use thiserror::Error;

/// Result type alias for HTTPDNS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the HTTPDNS client
#[derive(Error, Debug)]
pub enum Error {
    /// A single attempt exceeded its deadline
    #[error("Attempt against {server} timed out after {timeout_ms}ms")]
    Timeout {
        /// Server the attempt was addressed to
        server: String,
        /// Per-attempt deadline
        timeout_ms: u64,
    },

    /// Response was empty or not shaped like an address list
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Every candidate server failed within one logical resolution
    #[error("All servers exhausted after {attempts} attempt(s)")]
    AllServersExhausted {
        /// Number of attempts made
        attempts: u32,
    },

    /// Hard miss with no usable stale record
    #[error("No cached fallback for {domain}: {reason}")]
    NoCachedFallback {
        /// Domain that could not be resolved
        domain: String,
        /// Why the resolution failed
        reason: String,
    },

    /// Transport-level failure (connection refused, HTTP status, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request or response payload could not be encrypted/decrypted
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Domain name failed validation
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cache store-related errors
    #[error("Cache store error: {0}")]
    CacheStore(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a timeout error
    pub fn timeout(server: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            server: server.into(),
            timeout_ms,
        }
    }

    /// Create a malformed response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create a "no cached fallback" error
    pub fn no_cached_fallback(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NoCachedFallback {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an encryption error
    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::Encryption(msg.into())
    }

    /// Create an invalid domain error
    pub fn invalid_domain(msg: impl Into<String>) -> Self {
        Self::InvalidDomain(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a cache store error
    pub fn cache_store(msg: impl Into<String>) -> Self {
        Self::CacheStore(msg.into())
    }

    /// Whether this error is a per-attempt failure that counts against the
    /// active server
    pub fn is_soft_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::MalformedResponse(_)
                | Self::Transport(_)
                | Self::Encryption(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_failures_are_classified() {
        assert!(Error::timeout("119.29.29.98", 2000).is_soft_failure());
        assert!(Error::malformed("empty body").is_soft_failure());
        assert!(Error::transport("HTTP 502").is_soft_failure());
        assert!(!Error::AllServersExhausted { attempts: 3 }.is_soft_failure());
        assert!(!Error::no_cached_fallback("example.com", "exhausted").is_soft_failure());
    }

    #[test]
    fn messages_name_the_domain() {
        let err = Error::no_cached_fallback("example.com", "all servers exhausted");
        assert_eq!(
            err.to_string(),
            "No cached fallback for example.com: all servers exhausted"
        );
    }
}
