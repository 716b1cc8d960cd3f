//! host:port helpers
//!
//! Transport addresses are kept as `host:port` strings, exactly as written in
//! the configuration, so that dialing a domain name defers resolution to the
//! moment of the dial.

use std::net::SocketAddr;

use tokio::net::lookup_host;

use crate::error::{Error, Result};

/// Address family a scheme is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Any,
    V4,
    V6,
}

impl Family {
    /// Family implied by a scheme name (`tcp4`, `tcp6`, everything else any).
    pub fn from_scheme(scheme: &str) -> Self {
        match scheme {
            "tcp4" => Family::V4,
            "tcp6" => Family::V6,
            _ => Family::Any,
        }
    }

    fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            Family::Any => true,
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        }
    }

    fn wildcard(self) -> &'static str {
        match self {
            Family::V6 => "::",
            _ => "0.0.0.0",
        }
    }
}

/// Split `host:port`, stripping brackets from IPv6 hosts.
///
/// Returns `None` when there is no port separator.
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port));
    }

    let (host, port) = addr.rsplit_once(':')?;
    if host.contains(':') {
        // bare IPv6 literal without brackets
        return None;
    }
    Some((host, port))
}

/// Join host and port, bracketing IPv6 hosts.
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Host portion of an address; the whole string when it has no port.
pub fn host_of(addr: &str) -> &str {
    match split_host_port(addr) {
        Some((host, _)) => host,
        None => addr.trim_start_matches('[').trim_end_matches(']'),
    }
}

/// Append `port` when `addr` carries none (or an empty one).
pub fn with_default_port(addr: &str, port: u16) -> String {
    match split_host_port(addr) {
        Some((_, p)) if !p.is_empty() => addr.to_string(),
        Some((host, _)) => join_host_port(host, &port.to_string()),
        None => join_host_port(host_of(addr), &port.to_string()),
    }
}

/// Validate the port of an address, if it has one.
pub fn check_port(addr: &str) -> std::result::Result<(), String> {
    match split_host_port(addr) {
        Some((_, port)) if !port.is_empty() => port
            .parse::<u16>()
            .map(|_| ())
            .map_err(|_| format!("invalid port {:?}", port)),
        _ => Ok(()),
    }
}

/// Resolve an address for dialing or listening, restricted to `family`.
///
/// An empty host resolves to the family's wildcard address.
pub async fn resolve(addr: &str, family: Family) -> Result<Vec<SocketAddr>> {
    let (host, port) = split_host_port(addr)
        .ok_or_else(|| Error::config(addr, "missing port in address"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| Error::config(addr, format!("invalid port {:?}", port)))?;
    let host = if host.is_empty() { family.wildcard() } else { host };

    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await?
        .filter(|a| family.matches(a))
        .collect();

    if addrs.is_empty() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no suitable address found for {}", addr),
        )));
    }
    Ok(addrs)
}
