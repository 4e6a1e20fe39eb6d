//! Wire format of the resolution service
//!
//! ## Request
//!
//! ```text
//! GET {scheme}://{server}/d?dn=<sealed domains>&id=<dns_id>&ttl=1[&type=AAAA|addrs][&ip=<route ip>]
//!                          [&token=..&ts=..&sig=..]
//! ```
//!
//! Several domains are comma-joined before sealing.
//!
//! ## Response (after opening)
//!
//! ```text
//! single domain, v4 or v6:   1.2.3.4;5.6.7.8,600
//! single domain, dual:       1.2.3.4,600|240e::1,600
//! batch, one line per name:  a.com.:1.2.3.4,600
//!                            b.com.:0|240e::2,300
//! ```
//!
//! `0` (or nothing) in an address list means no answer for that family.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::config::HttpDnsConfig;
use crate::error::{Error, Result};
use crate::record::{StackMode, normalize_domain};
use crate::resolver::cipher::PayloadCipher;
use crate::traits::{Scheme, TransportRequest};

/// Request path on every server
const RESOLVE_PATH: &str = "/d";

/// Parsed answer for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Addresses in response order
    pub ips: Vec<IpAddr>,
    /// Smallest TTL reported across families, if any
    pub ttl_secs: Option<u64>,
}

/// Build the request for a set of domains addressed to one server
pub fn build_request(
    server: &str,
    domains: &[String],
    stack: StackMode,
    config: &HttpDnsConfig,
    cipher: &PayloadCipher,
    timestamp: i64,
) -> Result<TransportRequest> {
    let joined = domains.join(",");
    let dn = cipher.seal(&joined)?;
    let dns_id = config.credentials.dns_id;

    let scheme = if config.servers.use_https
        || cipher.mode() == crate::config::EncryptionMode::SignedToken
    {
        Scheme::Https
    } else {
        Scheme::Http
    };

    let mut request = TransportRequest::new(server, scheme, RESOLVE_PATH)
        .with_param("dn", dn.clone())
        .with_param("id", dns_id.to_string())
        .with_param("ttl", "1");

    match stack {
        StackMode::V4 => {}
        StackMode::V6 => request = request.with_param("type", "AAAA"),
        StackMode::Dual => request = request.with_param("type", "addrs"),
    }

    if let Some(route_ip) = config.route_ip {
        request = request.with_param("ip", route_ip.to_string());
    }

    if let Some(sig) = cipher.sign(&dn, dns_id, timestamp)? {
        request = request
            .with_param("token", sig.token)
            .with_param("ts", sig.timestamp.to_string())
            .with_param("sig", sig.signature);
    }

    Ok(request)
}

/// Parse the answer for a single requested domain
pub fn parse_single(body: &str, stack: StackMode) -> Result<Answer> {
    let body = body.trim();
    if body.is_empty() {
        return Err(Error::malformed("empty response"));
    }

    let answer = parse_answer(body, stack)?;
    if answer.ips.is_empty() {
        return Err(Error::malformed("response contains no addresses"));
    }
    Ok(answer)
}

/// Parse a batch response
///
/// Every requested domain gets an entry: its answer, or the reason it has
/// none. Fails as a whole only when the body is unusable for every domain.
pub fn parse_batch(
    body: &str,
    domains: &[String],
    stack: StackMode,
) -> Result<HashMap<String, Result<Answer>>> {
    if let [domain] = domains {
        let answer = parse_single(body, stack)?;
        return Ok(HashMap::from([(domain.clone(), Ok(answer))]));
    }

    let body = body.trim();
    if body.is_empty() {
        return Err(Error::malformed("empty response"));
    }

    let mut parsed: HashMap<String, Answer> = HashMap::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (name, rest) = line
            .split_once(':')
            .ok_or_else(|| Error::malformed(format!("batch line without domain: {}", line)))?;
        let name = normalize_domain(name)
            .map_err(|_| Error::malformed(format!("batch line with bad domain: {}", line)))?;
        let answer = parse_answer(rest, stack)?;
        if !answer.ips.is_empty() {
            parsed.insert(name, answer);
        }
    }

    if parsed.is_empty() {
        return Err(Error::malformed("batch response contains no addresses"));
    }

    Ok(domains
        .iter()
        .map(|domain| {
            let entry = parsed
                .remove(domain)
                .ok_or_else(|| Error::malformed(format!("no answer for {}", domain)));
            (domain.clone(), entry)
        })
        .collect())
}

/// `<family part>[|<family part>]`
fn parse_answer(body: &str, stack: StackMode) -> Result<Answer> {
    let mut ips = Vec::new();
    let mut ttl: Option<u64> = None;

    for part in body.split('|') {
        let (part_ips, part_ttl) = parse_family(part)?;
        if part_ips.is_empty() {
            continue;
        }
        ips.extend(part_ips.into_iter().filter(|ip| stack.accepts(ip)));
        if let Some(t) = part_ttl {
            ttl = Some(ttl.map_or(t, |current| current.min(t)));
        }
    }

    Ok(Answer { ips, ttl_secs: ttl })
}

/// `<ip>[;<ip>...][,<ttl>]`
fn parse_family(part: &str) -> Result<(Vec<IpAddr>, Option<u64>)> {
    let part = part.trim();
    let (list, ttl) = match part.rsplit_once(',') {
        Some((list, ttl)) => {
            let ttl = ttl
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::malformed(format!("bad TTL in '{}'", part)))?;
            (list, Some(ttl))
        }
        None => (part, None),
    };

    let mut ips = Vec::new();
    for token in list.split(';').map(str::trim) {
        if token.is_empty() || token == "0" {
            continue;
        }
        let ip = token
            .parse::<IpAddr>()
            .map_err(|_| Error::malformed(format!("not an IP address: '{}'", token)))?;
        ips.push(ip);
    }

    Ok((ips, ttl))
}
