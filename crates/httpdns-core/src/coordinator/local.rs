//! Operating system resolver, used as the last resort

use std::net::IpAddr;
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::StackMode;

/// Resolve through `getaddrinfo`, keeping only the families of `stack`
pub(super) async fn lookup(domain: &str, stack: StackMode) -> Result<Vec<IpAddr>> {
    let mut ips: Vec<IpAddr> = Vec::new();
    for addr in tokio::net::lookup_host(format!("{}:0", domain)).await? {
        let ip = addr.ip();
        if stack.accepts(&ip) && !ips.contains(&ip) {
            ips.push(ip);
        }
    }

    if ips.is_empty() {
        return Err(Error::transport(format!(
            "system resolver returned no {} addresses for {}",
            stack, domain
        )));
    }

    debug!(domain = domain, count = ips.len(), "system DNS resolved");
    Ok(ips)
}
