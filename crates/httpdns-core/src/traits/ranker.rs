// # IP Ranker Trait
//
// Orders the addresses of a fresh answer, best first. The ordering policy is
// pluggable; the built-in rankers only use externally supplied priority hints
// and the order the service answered in.

use std::collections::HashSet;
use std::net::IpAddr;

/// Trait for address ranking strategies
pub trait IpRanker: Send + Sync {
    /// Rank an answer
    ///
    /// # Parameters
    ///
    /// - `domain`: Normalized domain the answer belongs to
    /// - `ips`: Addresses in response order
    /// - `hints`: Configured priority list for this domain, if any
    ///
    /// # Returns
    ///
    /// The same addresses (duplicates removed), best first
    fn rank(&self, domain: &str, ips: Vec<IpAddr>, hints: Option<&[IpAddr]>) -> Vec<IpAddr>;

    /// Get the ranker name (for logging/debugging)
    fn ranker_name(&self) -> &'static str;
}

/// Keeps the response order
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseOrderRanker;

impl IpRanker for ResponseOrderRanker {
    fn rank(&self, _domain: &str, ips: Vec<IpAddr>, _hints: Option<&[IpAddr]>) -> Vec<IpAddr> {
        dedup(ips)
    }

    fn ranker_name(&self) -> &'static str {
        "response-order"
    }
}

/// Puts hinted addresses first (in hint order), then the rest in response
/// order
#[derive(Debug, Clone, Copy, Default)]
pub struct HintRanker;

impl IpRanker for HintRanker {
    fn rank(&self, _domain: &str, ips: Vec<IpAddr>, hints: Option<&[IpAddr]>) -> Vec<IpAddr> {
        let ips = dedup(ips);
        let Some(hints) = hints else {
            return ips;
        };

        let mut ranked: Vec<IpAddr> = hints.iter().filter(|h| ips.contains(h)).copied().collect();
        ranked.extend(ips.into_iter().filter(|ip| !hints.contains(ip)));
        ranked
    }

    fn ranker_name(&self) -> &'static str {
        "hint"
    }
}

fn dedup(ips: Vec<IpAddr>) -> Vec<IpAddr> {
    let mut seen = HashSet::with_capacity(ips.len());
    ips.into_iter().filter(|ip| seen.insert(*ip)).collect()
}
