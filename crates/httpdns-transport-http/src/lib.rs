// # HTTP Transport
//
// This crate provides the HTTP(S) transport for the HTTPDNS client.
//
// ## Purpose
//
// Carries resolution requests built by `httpdns-core` to the service and
// hands back the raw response body. It does not retry: failover belongs to
// the core's resolver, which treats every error returned here as a soft
// failure of the targeted server.
//
// ## Architecture
//
// One shared `reqwest::Client` (connection pooling, TLS) per transport. The
// per-request deadline comes from the resolver with every call.

use httpdns_core::traits::{Transport, TransportRequest};
use httpdns_core::{Error, Result};

use std::time::Duration;

/// User agent sent with every request
const USER_AGENT: &str = concat!("httpdns/", env!("CARGO_PKG_VERSION"));

/// Idle pooled connections kept per server
const POOL_MAX_IDLE_PER_HOST: usize = 4;

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// HTTP client
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a default client
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|e| Error::transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Use a preconfigured client (proxies, custom TLS roots, ...)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &TransportRequest, timeout: Duration) -> Result<Vec<u8>> {
        let url = request.url();
        tracing::trace!("GET {}://{}{}", request.scheme, request.server, request.path);

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(&request.server, timeout.as_millis() as u64)
                } else {
                    Error::transport(format!("Request to {} failed: {}", request.server, e))
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::transport(format!(
                "HTTP error from {}: {}",
                request.server,
                response.status()
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            Error::transport(format!(
                "Failed to read response from {}: {}",
                request.server, e
            ))
        })?;

        Ok(body.to_vec())
    }

    fn transport_name(&self) -> &'static str {
        "http"
    }
}
