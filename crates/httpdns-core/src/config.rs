//! Configuration types for the HTTPDNS client
//!
//! This module defines all configuration structures used throughout the crate.
//! Configuration is an explicit value handed to the coordinator at
//! construction; runtime changes go through [`ConfigHandle`], and every
//! resolution attempt works against a point-in-time snapshot.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::record::{StackMode, normalize_domain, saturating_secs};

/// Upper bound for every duration setting given in seconds (ten years)
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 3600;

/// Main HTTPDNS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpDnsConfig {
    /// Service credentials
    pub credentials: Credentials,

    /// How requests and responses are protected
    #[serde(default)]
    pub encryption: EncryptionMode,

    /// Primary and backup resolution servers
    pub servers: ServerConfig,

    /// Deadline of a single attempt against one server (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long a blocking lookup waits for an in-flight resolution
    /// (milliseconds)
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    /// Server failover tuning
    #[serde(default)]
    pub failover: FailoverConfig,

    /// Domain cache behavior
    #[serde(default)]
    pub cache: CacheConfig,

    /// Domains kept warm in the background
    #[serde(default)]
    pub keepalive: KeepaliveConfig,

    /// Domains resolved once at startup
    #[serde(default)]
    pub pre_resolve: Vec<String>,

    /// Ranking hints: domain -> addresses in priority order
    #[serde(default)]
    pub ip_rank: HashMap<String, Vec<IpAddr>>,

    /// Client address forwarded to the service for locality-aware answers
    #[serde(default)]
    pub route_ip: Option<IpAddr>,

    /// Which domains go through HTTPDNS at all
    #[serde(default)]
    pub domain_filter: DomainFilter,

    /// Resolve through the operating system when HTTPDNS cannot answer
    #[serde(default)]
    pub local_dns_fallback: bool,

    /// Maximum number of domains in one outbound request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Stack mode used when the caller does not choose one
    #[serde(default)]
    pub default_stack: StackMode,

    /// Capacity of the internal event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl HttpDnsConfig {
    /// Create a configuration for the given credentials and primary server
    pub fn new(credentials: Credentials, primary: impl Into<String>) -> Self {
        Self {
            credentials,
            encryption: EncryptionMode::default(),
            servers: ServerConfig::new(primary),
            timeout_ms: default_timeout_ms(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            failover: FailoverConfig::default(),
            cache: CacheConfig::default(),
            keepalive: KeepaliveConfig::default(),
            pre_resolve: Vec::new(),
            ip_rank: HashMap::new(),
            route_ip: None,
            domain_filter: DomainFilter::default(),
            local_dns_fallback: false,
            batch_size: default_batch_size(),
            default_stack: StackMode::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Per-attempt deadline
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Caller wait bound for hard misses
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.credentials.validate(self.encryption)?;
        self.servers.validate()?;
        self.failover.validate()?;
        self.cache.validate()?;
        self.keepalive.validate()?;

        if self.timeout_ms == 0 {
            return Err(Error::config("timeout_ms must be > 0"));
        }
        if self.lookup_timeout_ms == 0 {
            return Err(Error::config("lookup_timeout_ms must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("event_channel_capacity must be > 0"));
        }

        for domain in &self.pre_resolve {
            normalize_domain(domain)?;
        }

        for (domain, ips) in &self.ip_rank {
            normalize_domain(domain)?;
            if ips.is_empty() {
                return Err(Error::config(format!(
                    "ip_rank entry for {} has no addresses",
                    domain
                )));
            }
        }

        Ok(())
    }

    /// Ranking hints for a normalized domain
    pub fn rank_hints(&self, domain: &str) -> Option<&[IpAddr]> {
        self.ip_rank
            .iter()
            .find(|(name, _)| normalize_domain(name).is_ok_and(|n| n == domain))
            .map(|(_, ips)| ips.as_slice())
    }
}

/// Service credentials
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct Credentials {
    /// Application identifier
    pub app_id: String,
    /// Numeric account id sent with every request
    pub dns_id: u32,
    /// Shared secret used for symmetric encryption and request signing
    #[serde(default)]
    pub dns_key: String,
    /// Access token for signed-token mode
    #[serde(default)]
    pub token: Option<String>,
}

impl Credentials {
    /// Create credentials
    pub fn new(app_id: impl Into<String>, dns_id: u32, dns_key: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            dns_id,
            dns_key: dns_key.into(),
            token: None,
        }
    }

    /// Set the access token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn validate(&self, mode: EncryptionMode) -> Result<()> {
        if self.dns_id == 0 {
            return Err(Error::config("dns_id must be set"));
        }

        match mode {
            EncryptionMode::Plain => Ok(()),
            EncryptionMode::Symmetric => {
                if self.dns_key.is_empty() {
                    return Err(Error::config("dns_key is required for symmetric encryption"));
                }
                Ok(())
            }
            EncryptionMode::SignedToken => {
                if self.dns_key.is_empty() {
                    return Err(Error::config("dns_key is required for signed-token mode"));
                }
                if self.token.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::config("token is required for signed-token mode"));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("dns_id", &self.dns_id)
            .field("dns_key", &"<redacted>")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Request protection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    /// Domain list and answer in clear text
    #[default]
    Plain,
    /// Domain list and answer encrypted with the shared key
    Symmetric,
    /// Clear text, authenticated with a token and an HMAC signature
    SignedToken,
}

/// Resolution server list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Primary server (host or host:port)
    pub primary: String,
    /// Backup servers, tried in order after the primary
    #[serde(default)]
    pub backups: Vec<String>,
    /// Use https instead of http
    #[serde(default)]
    pub use_https: bool,
}

impl ServerConfig {
    /// Create a server list with only a primary
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            backups: Vec::new(),
            use_https: false,
        }
    }

    /// Set the backup servers
    pub fn with_backups<I, S>(mut self, backups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backups = backups.into_iter().map(Into::into).collect();
        self
    }

    /// Primary followed by backups
    pub fn all(&self) -> Vec<String> {
        std::iter::once(self.primary.clone())
            .chain(self.backups.iter().cloned())
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.primary.trim().is_empty() {
            return Err(Error::config("Primary server cannot be empty"));
        }
        if self.backups.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::config("Backup server entries cannot be empty"));
        }
        Ok(())
    }
}

/// Failover tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Consecutive soft failures before moving to the next server
    #[serde(default = "default_retry_before_switch")]
    pub retry_before_switch: u32,

    /// Minutes after a switch before the primary is tried again
    #[serde(default = "default_switch_back_minutes")]
    pub switch_back_minutes: u64,
}

impl FailoverConfig {
    /// Cool-down before switching back to the primary
    pub fn switch_back_after(&self) -> chrono::Duration {
        saturating_secs(self.switch_back_minutes.saturating_mul(60))
    }

    fn validate(&self) -> Result<()> {
        if self.retry_before_switch == 0 {
            return Err(Error::config("retry_before_switch must be >= 1"));
        }
        check_secs("switch_back_minutes", self.switch_back_minutes.saturating_mul(60))?;
        Ok(())
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            retry_before_switch: default_retry_before_switch(),
            switch_back_minutes: default_switch_back_minutes(),
        }
    }
}

/// Domain cache behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL used when the service does not report one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Lower bound applied to service TTLs
    #[serde(default = "default_min_ttl_secs")]
    pub min_ttl_secs: u64,

    /// Upper bound applied to service TTLs
    #[serde(default = "default_max_ttl_secs")]
    pub max_ttl_secs: u64,

    /// Share of the TTL after which a background refresh is due
    #[serde(default = "default_refresh_ratio")]
    pub refresh_ratio: f64,

    /// Serve expired records when a resolution fails
    #[serde(default)]
    pub expired_ip_enabled: bool,

    /// How long past expiry a record may still be served (unbounded if unset)
    #[serde(default)]
    pub expired_ip_grace_secs: Option<u64>,

    /// Persist the cache through the configured store
    #[serde(default)]
    pub persist_enabled: bool,

    /// Location of the persisted cache file
    #[serde(default)]
    pub persist_path: Option<String>,

    /// Persisted records older than `ttl + grace` are dropped on load
    #[serde(default = "default_persist_grace_secs")]
    pub persist_grace_secs: u64,
}

impl CacheConfig {
    fn validate(&self) -> Result<()> {
        if self.min_ttl_secs == 0 {
            return Err(Error::config("min_ttl_secs must be > 0"));
        }
        if self.default_ttl_secs < self.min_ttl_secs {
            return Err(Error::config(format!(
                "default_ttl_secs ({}) must be >= min_ttl_secs ({})",
                self.default_ttl_secs, self.min_ttl_secs
            )));
        }
        if self.max_ttl_secs < self.default_ttl_secs {
            return Err(Error::config(format!(
                "max_ttl_secs ({}) must be >= default_ttl_secs ({})",
                self.max_ttl_secs, self.default_ttl_secs
            )));
        }
        check_secs("max_ttl_secs", self.max_ttl_secs)?;
        check_secs("persist_grace_secs", self.persist_grace_secs)?;
        if let Some(grace) = self.expired_ip_grace_secs {
            check_secs("expired_ip_grace_secs", grace)?;
        }
        if !(self.refresh_ratio > 0.0 && self.refresh_ratio <= 1.0) {
            return Err(Error::config("refresh_ratio must be in (0, 1]"));
        }
        if self.persist_path.as_deref().is_some_and(str::is_empty) {
            return Err(Error::config("persist_path cannot be empty"));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            min_ttl_secs: default_min_ttl_secs(),
            max_ttl_secs: default_max_ttl_secs(),
            refresh_ratio: default_refresh_ratio(),
            expired_ip_enabled: false,
            expired_ip_grace_secs: None,
            persist_enabled: false,
            persist_path: None,
            persist_grace_secs: default_persist_grace_secs(),
        }
    }
}

/// Keepalive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Whether the keepalive loop runs
    #[serde(default)]
    pub enabled: bool,

    /// Domains kept warm
    #[serde(default)]
    pub domains: Vec<KeepaliveDomain>,

    /// Cadence of the keepalive loop (seconds)
    #[serde(default = "default_keepalive_interval_secs")]
    pub interval_secs: u64,

    /// A domain resolved more recently than this is skipped (seconds)
    #[serde(default = "default_keepalive_min_interval_secs")]
    pub min_interval_secs: u64,
}

impl KeepaliveConfig {
    fn validate(&self) -> Result<()> {
        if self.enabled && self.interval_secs == 0 {
            return Err(Error::config("keepalive interval_secs must be > 0"));
        }
        check_secs("keepalive interval_secs", self.interval_secs)?;
        check_secs("keepalive min_interval_secs", self.min_interval_secs)?;
        for entry in &self.domains {
            normalize_domain(&entry.domain)?;
        }
        Ok(())
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            domains: Vec::new(),
            interval_secs: default_keepalive_interval_secs(),
            min_interval_secs: default_keepalive_min_interval_secs(),
        }
    }
}

/// One entry of the keepalive set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveDomain {
    /// Domain name
    pub domain: String,
    /// Requested stack mode
    #[serde(default)]
    pub stack: StackMode,
}

impl KeepaliveDomain {
    /// Create a keepalive entry
    pub fn new(domain: impl Into<String>, stack: StackMode) -> Self {
        Self {
            domain: domain.into(),
            stack,
        }
    }
}

/// Domain suffix filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainFilter {
    /// If non-empty, only matching domains use HTTPDNS
    #[serde(default)]
    pub only: Vec<String>,
    /// Matching domains never use HTTPDNS
    #[serde(default)]
    pub never: Vec<String>,
}

impl DomainFilter {
    /// Whether a normalized domain may be resolved through HTTPDNS
    pub fn allows(&self, domain: &str) -> bool {
        if self.never.iter().any(|s| suffix_matches(domain, s)) {
            return false;
        }
        self.only.is_empty() || self.only.iter().any(|s| suffix_matches(domain, s))
    }
}

fn suffix_matches(domain: &str, suffix: &str) -> bool {
    let suffix = suffix.trim().trim_end_matches('.').to_ascii_lowercase();
    domain == suffix || domain.ends_with(&format!(".{}", suffix))
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_lookup_timeout_ms() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    8
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_retry_before_switch() -> u32 {
    3
}

fn default_switch_back_minutes() -> u64 {
    10
}

fn default_ttl_secs() -> u64 {
    600
}

fn default_min_ttl_secs() -> u64 {
    60
}

fn default_max_ttl_secs() -> u64 {
    86_400
}

fn check_secs(name: &str, secs: u64) -> Result<()> {
    if secs > MAX_DURATION_SECS {
        return Err(Error::config(format!(
            "{} must be <= {} seconds, got {}",
            name, MAX_DURATION_SECS, secs
        )));
    }
    Ok(())
}

fn default_refresh_ratio() -> f64 {
    0.75
}

fn default_persist_grace_secs() -> u64 {
    0
}

fn default_keepalive_interval_secs() -> u64 {
    60
}

fn default_keepalive_min_interval_secs() -> u64 {
    30
}

/// Shared, externally mutable configuration
///
/// Readers take an `Arc` snapshot; writers swap the whole value after
/// validating it, so a resolution never sees a half-applied update.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<HttpDnsConfig>>>,
}

impl ConfigHandle {
    /// Validate and wrap a configuration
    pub fn new(config: HttpDnsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// Point-in-time view of the configuration
    pub fn snapshot(&self) -> Arc<HttpDnsConfig> {
        Arc::clone(&self.inner.read())
    }

    /// Replace the configuration
    pub fn replace(&self, config: HttpDnsConfig) -> Result<()> {
        config.validate()?;
        *self.inner.write() = Arc::new(config);
        Ok(())
    }

    /// Apply a change to a copy of the current configuration and swap it in
    pub fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut HttpDnsConfig),
    {
        let mut next = (*self.snapshot()).clone();
        change(&mut next);
        self.replace(next)
    }
}
