//! Transport URLs and chains
//!
//! A transport is configured by a URL-like string:
//!
//! ```text
//! tls://example.com:443?serverName=example.com&skipVerify=true
//! ```
//!
//! Server configurations may stack layers with a comma: everything after the
//! first `,` configures the server that receives the decrypted stream.
//!
//! ```text
//! tls://:443?cert=server.crt&key=server.key,tcp://
//! ```

use ::url::form_urlencoded;

use crate::common::address::check_port;
use crate::error::{Error, Result};

/// One parsed transport URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportUrl {
    /// Scheme, lowercased (`tcp`, `tls`, ...)
    pub scheme: String,
    /// `host:port` as written; may be empty or lack a port
    pub host: String,
    /// Decoded query pairs, in order
    pub query: Vec<(String, String)>,
}

impl TransportUrl {
    pub fn parse(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::config(s, "missing scheme"))?;

        if !valid_scheme(scheme) {
            return Err(Error::config(s, format!("invalid scheme {:?}", scheme)));
        }

        let rest = rest.split('#').next().unwrap_or_default();
        let (before_query, raw_query) = match rest.split_once('?') {
            Some((b, q)) => (b, q),
            None => (rest, ""),
        };

        // authority ends at the first path separator
        let authority = before_query.split('/').next().unwrap_or_default();
        let host = match authority.rsplit_once('@') {
            Some((_userinfo, host)) => host,
            None => authority,
        };

        check_port(host).map_err(|reason| Error::config(s, reason))?;

        let query = form_urlencoded::parse(raw_query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            query,
        })
    }

    /// First non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Whether `key` is set to exactly `true`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }
}

/// A stack of transport URLs: `head`, then the layer it hands off to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub url: TransportUrl,
    pub next: Option<Box<Chain>>,
}

impl Chain {
    /// Parse `a,b,c` into `a -> b -> c`.
    pub fn parse(s: &str) -> Result<Self> {
        let (head, rest) = match s.split_once(',') {
            Some((head, rest)) => (head, Some(rest)),
            None => (s, None),
        };

        let url = TransportUrl::parse(head.trim())?;
        let next = match rest.map(str::trim) {
            Some(rest) if !rest.is_empty() => Some(Box::new(Chain::parse(rest)?)),
            _ => None,
        };

        Ok(Self { url, next })
    }

    pub fn scheme(&self) -> &str {
        &self.url.scheme
    }

    /// Number of layers in the chain.
    pub fn depth(&self) -> usize {
        1 + self.next.as_ref().map_or(0, |n| n.depth())
    }
}

fn valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
