//! Seed member parsing and resolution.

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

/// RFC 1123 host name.
static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*$")
        .expect("hostname pattern is valid")
});

const MAX_HOSTNAME_LENGTH: usize = 253;

/// A syntactically valid seed, not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seed {
    /// Literal socket address.
    Addr(SocketAddr),
    /// Host name that still needs a DNS lookup.
    Host(String, u16),
}

/// Parse one seed entry.
///
/// Accepts `ip`, `ip:port`, `[ipv6]`, `[ipv6]:port`, `host` and `host:port`;
/// entries without a port use `default_port`. Returns `None` for anything
/// malformed.
#[must_use]
pub fn parse_seed(raw: &str, default_port: u16) -> Option<Seed> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return (addr.port() != 0).then_some(Seed::Addr(addr));
    }
    let bare = raw
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(raw);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Some(Seed::Addr(SocketAddr::new(ip, default_port)));
    }

    let (host, port) = match raw.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok().filter(|p| *p != 0)?),
        None => (raw, default_port),
    };
    if host.len() > MAX_HOSTNAME_LENGTH || !HOSTNAME.is_match(host) {
        return None;
    }
    Some(Seed::Host(host.to_string(), port))
}

/// Parse and resolve seeds, skipping the ones that are malformed or do not
/// resolve.
///
/// Host names are looked up concurrently and each lookup is abandoned after
/// `lookup_timeout`. Duplicates are dropped; the first occurrence keeps its
/// position.
pub async fn resolve_seeds(
    raw: &[String],
    default_port: u16,
    lookup_timeout: Duration,
) -> Vec<SocketAddr> {
    resolve_with(raw, default_port, lookup_timeout, |host, port| async move {
        tokio::net::lookup_host((host.as_str(), port))
            .await
            .map(|mut addrs| addrs.next())
    })
    .await
}

async fn resolve_with<F, Fut>(
    raw: &[String],
    default_port: u16,
    lookup_timeout: Duration,
    lookup: F,
) -> Vec<SocketAddr>
where
    F: Fn(String, u16) -> Fut,
    Fut: Future<Output = io::Result<Option<SocketAddr>>>,
{
    let lookups = raw.iter().map(|entry| {
        let seed = parse_seed(entry, default_port);
        let lookup = &lookup;
        async move {
            match seed {
                Some(Seed::Addr(addr)) => Some(addr),
                Some(Seed::Host(host, port)) => {
                    match tokio::time::timeout(lookup_timeout, lookup(host, port)).await {
                        Ok(Ok(Some(addr))) => Some(addr),
                        Ok(Ok(None)) => {
                            tracing::warn!(seed = %entry, "Seed resolved to no addresses, skipping");
                            None
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(seed = %entry, error = %e, "Failed to resolve seed, skipping");
                            None
                        }
                        Err(_) => {
                            tracing::warn!(seed = %entry, ?lookup_timeout, "Seed lookup timed out, skipping");
                            None
                        }
                    }
                }
                None => {
                    tracing::warn!(seed = %entry, "Malformed seed member, skipping");
                    None
                }
            }
        }
    });

    let mut seen = HashSet::new();
    futures::future::join_all(lookups)
        .await
        .into_iter()
        .flatten()
        .filter(|addr| seen.insert(*addr))
        .collect()
}
