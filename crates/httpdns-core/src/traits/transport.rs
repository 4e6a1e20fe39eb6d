// # Transport Trait
//
// Defines the request/response primitive used to reach resolution servers.
//
// ## Implementations
//
// - HTTP(S): `httpdns-transport-http` crate
// - Test doubles: scripted transports in the contract tests
//
// ## Usage
//
// ```rust,ignore
// use httpdns_core::traits::{Transport, TransportRequest, Scheme};
// use std::time::Duration;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let transport = /* Transport implementation */;
//
//     let request = TransportRequest::new("119.29.29.98", Scheme::Http, "/d")
//         .with_param("dn", "example.com");
//     let body = transport.send(&request, Duration::from_secs(2)).await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// URL scheme of an outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain HTTP
    Http,
    /// HTTP over TLS
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => f.write_str("http"),
            Scheme::Https => f.write_str("https"),
        }
    }
}

/// One outbound request, already encrypted/signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// Target server (host or host:port)
    pub server: String,
    /// URL scheme
    pub scheme: Scheme,
    /// Request path (e.g. `/d`)
    pub path: String,
    /// Query parameters in order
    pub query: Vec<(String, String)>,
}

impl TransportRequest {
    /// Create a request without parameters
    pub fn new(server: impl Into<String>, scheme: Scheme, path: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            scheme,
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Append a query parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Look up a query parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Full URL with percent-encoded parameters
    pub fn url(&self) -> String {
        let mut url = format!("{}://{}{}", self.scheme, self.server, self.path);
        for (i, (key, value)) in self.query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(&encode_component(key));
            url.push('=');
            url.push_str(&encode_component(value));
        }
        url
    }
}

fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b',' | b':' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Trait for transport implementations
///
/// A transport executes exactly one request against exactly one server.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform one HTTP(S) request to the given server
/// - ✅ Return the raw body or a failure
///
/// ## Forbidden Capabilities
/// - ❌ Retry or switch servers (owned by the resolver's failover state)
/// - ❌ Parse or cache answers (owned by the resolver and the domain cache)
/// - ❌ Spawn tasks that outlive the call
///
/// Returning an error is always correct: the resolver counts it against the
/// active server and moves on according to its failover policy.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a request and return the raw response body
    ///
    /// # Parameters
    ///
    /// - `request`: Fully built request (server, path, parameters)
    /// - `timeout`: Deadline for the whole exchange
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<u8>)`: Response body of a successful exchange
    /// - `Err(Error)`: Transport failure, non-success status, or timeout
    async fn send(
        &self,
        request: &TransportRequest,
        timeout: Duration,
    ) -> Result<Vec<u8>, crate::Error>;

    /// Get the transport name (for logging/debugging)
    fn transport_name(&self) -> &'static str;
}
