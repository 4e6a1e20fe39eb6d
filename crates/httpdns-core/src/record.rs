//! Resolution records and cache keys
//!
//! A [`ResolutionRecord`] is what one successful resolution produces for a
//! single `(domain, stack mode)` pair. Records are only ever built from a
//! non-empty address list; the resolver reports a failure instead of an empty
//! record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Which address families a resolution targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StackMode {
    /// IPv4 only
    #[default]
    V4,
    /// IPv6 only
    V6,
    /// Both IPv4 and IPv6
    Dual,
}

impl StackMode {
    /// Whether an address belongs to a family this mode asked for
    pub fn accepts(&self, ip: &IpAddr) -> bool {
        match self {
            StackMode::V4 => ip.is_ipv4(),
            StackMode::V6 => ip.is_ipv6(),
            StackMode::Dual => true,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            StackMode::V4 => "v4",
            StackMode::V6 => "v6",
            StackMode::Dual => "dual",
        }
    }
}

impl fmt::Display for StackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v4" | "ipv4" => Ok(StackMode::V4),
            "v6" | "ipv6" => Ok(StackMode::V6),
            "dual" | "both" => Ok(StackMode::Dual),
            other => Err(Error::config(format!(
                "Unknown stack mode '{}'. Valid: v4, v6, dual",
                other
            ))),
        }
    }
}

/// Key of the domain cache: one record per `(domain, stack mode)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Normalized domain name
    pub domain: String,
    /// Requested address families
    pub stack: StackMode,
}

impl CacheKey {
    /// Create a key; `domain` is expected to be normalized already
    pub fn new(domain: impl Into<String>, stack: StackMode) -> Self {
        Self {
            domain: domain.into(),
            stack,
        }
    }
}

/// Persisted form is `domain/stack`, e.g. `example.com/dual`
impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.stack)
    }
}

impl FromStr for CacheKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (domain, stack) = s
            .rsplit_once('/')
            .ok_or_else(|| Error::cache_store(format!("Malformed cache key: {}", s)))?;
        Ok(Self::new(normalize_domain(domain)?, stack.parse()?))
    }
}

/// Freshness classification of a cached record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Younger than the refresh threshold
    Fresh,
    /// Past the refresh threshold but still within its TTL
    StaleRefreshDue,
    /// Older than its TTL
    Expired,
    /// Nothing cached
    Absent,
}

impl Freshness {
    /// Whether a record in this state may be handed to callers without a
    /// fallback decision
    pub fn is_usable(&self) -> bool {
        matches!(self, Freshness::Fresh | Freshness::StaleRefreshDue)
    }
}

/// Result of one successful resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    /// Addresses, best first
    pub ips: Vec<IpAddr>,
    /// Time of the successful resolution
    pub fetched_at: DateTime<Utc>,
    /// Validity window
    pub ttl_secs: u64,
    /// Address families that were requested
    pub stack: StackMode,
}

impl ResolutionRecord {
    /// Create a record
    ///
    /// Fails with [`Error::MalformedResponse`] when `ips` is empty.
    pub fn new(
        ips: Vec<IpAddr>,
        fetched_at: DateTime<Utc>,
        ttl_secs: u64,
        stack: StackMode,
    ) -> Result<Self> {
        if ips.is_empty() {
            return Err(Error::malformed("resolution produced no addresses"));
        }
        Ok(Self {
            ips,
            fetched_at,
            ttl_secs,
            stack,
        })
    }

    /// Time elapsed since the record was fetched (never negative)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        let age = now.signed_duration_since(self.fetched_at);
        if age < Duration::zero() {
            Duration::zero()
        } else {
            age
        }
    }

    /// When the record expires
    pub fn expires_at(&self) -> DateTime<Utc> {
        saturating_add(self.fetched_at, saturating_secs(self.ttl_secs))
    }

    /// Classify the record at `now`
    ///
    /// `refresh_ratio` is the share of the TTL after which a refresh is due.
    pub fn freshness(&self, now: DateTime<Utc>, refresh_ratio: f64) -> Freshness {
        let age_ms = self.age(now).num_milliseconds();
        let ttl_ms = saturating_secs(self.ttl_secs).num_milliseconds();

        if age_ms >= ttl_ms {
            Freshness::Expired
        } else if age_ms as f64 >= ttl_ms as f64 * refresh_ratio {
            Freshness::StaleRefreshDue
        } else {
            Freshness::Fresh
        }
    }

    /// Whether an expired record is still inside `grace_secs` past its TTL
    ///
    /// `None` means the grace window is unbounded.
    pub fn within_grace(&self, now: DateTime<Utc>, grace_secs: Option<u64>) -> bool {
        match grace_secs {
            None => true,
            Some(grace) => now < saturating_add(self.expires_at(), saturating_secs(grace)),
        }
    }
}

/// `secs` as a duration, capped at the largest representable one
pub(crate) fn saturating_secs(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or_else(Duration::max_value)
}

/// `at + delta`, capped at the latest representable instant
pub(crate) fn saturating_add(at: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Normalize and validate a domain name
///
/// Trims whitespace, lowercases, strips one trailing dot and applies the
/// RFC 1035 length and label rules.
pub fn normalize_domain(domain: &str) -> Result<String> {
    let trimmed = domain.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    let domain = trimmed.to_ascii_lowercase();

    if domain.is_empty() {
        return Err(Error::invalid_domain("Domain name cannot be empty"));
    }

    if domain.len() > 253 {
        return Err(Error::invalid_domain(format!(
            "Domain name too long: {} chars (max 253)",
            domain.len()
        )));
    }

    for label in domain.split('.') {
        if label.is_empty() {
            return Err(Error::invalid_domain(format!(
                "Domain name has empty label: '{}'",
                domain
            )));
        }

        if label.len() > 63 {
            return Err(Error::invalid_domain(format!(
                "Domain label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            )));
        }

        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::invalid_domain(format!(
                "Domain label contains invalid characters: '{}'",
                label
            )));
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(Error::invalid_domain(format!(
                "Domain label cannot start or end with hyphen: '{}'",
                label
            )));
        }
    }

    Ok(domain)
}
