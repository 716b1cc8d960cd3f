//! Transport registry
//!
//! Maps a scheme name to the factories that build its dialer and server
//! roles. The table is an ordinary value: it is filled once at startup
//! (`with_builtin` plus any extra `register` calls) and then only read,
//! shared by reference with whatever builds transports.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::common::{Chain, Result, TransportUrl};
use crate::error::Error;
use crate::selector::Selector;
use crate::transport::{Dialer, Server, TcpTransport, TlsTransport};

/// Builds the dialer role from a URL and an optional upstream to tunnel through
pub type DialerFactory =
    Arc<dyn Fn(&TransportUrl, Option<Arc<dyn Dialer>>) -> Result<Arc<dyn Dialer>> + Send + Sync>;

/// Builds the server role from a chain node; the registry is passed along so
/// a server can build its nested layers
pub type ServerFactory =
    Arc<dyn Fn(&Chain, Arc<dyn Selector>, &Registry) -> Result<Arc<dyn Server>> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    dialer: DialerFactory,
    server: ServerFactory,
}

/// Scheme-keyed factory table
#[derive(Clone, Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `tcp`, `tcp4`, `tcp6` and `tls`
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();

        for scheme in ["tcp", "tcp4", "tcp6"] {
            registry.register(
                scheme,
                |url, upstream| Ok(Arc::new(TcpTransport::dialer(url, upstream)) as Arc<dyn Dialer>),
                |chain, selector, _registry| {
                    Ok(Arc::new(TcpTransport::server(&chain.url, selector)) as Arc<dyn Server>)
                },
            );
        }

        registry.register(
            "tls",
            |url, upstream| Ok(Arc::new(TlsTransport::dialer(url, upstream)?) as Arc<dyn Dialer>),
            |chain, selector, registry| {
                Ok(Arc::new(TlsTransport::server(chain, selector, registry)?) as Arc<dyn Server>)
            },
        );

        registry
    }

    /// Register both roles for `scheme`. A later registration replaces an
    /// earlier one.
    pub fn register<D, S>(&mut self, scheme: &str, dialer: D, server: S)
    where
        D: Fn(&TransportUrl, Option<Arc<dyn Dialer>>) -> Result<Arc<dyn Dialer>> + Send + Sync + 'static,
        S: Fn(&Chain, Arc<dyn Selector>, &Registry) -> Result<Arc<dyn Server>> + Send + Sync + 'static,
    {
        let scheme = scheme.to_ascii_lowercase();
        debug!("registering transport scheme {}", scheme);
        self.entries.insert(
            scheme,
            Entry {
                dialer: Arc::new(dialer),
                server: Arc::new(server),
            },
        );
    }

    pub fn contains(&self, scheme: &str) -> bool {
        self.entries.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    fn entry(&self, scheme: &str) -> Result<&Entry> {
        self.entries
            .get(scheme)
            .ok_or_else(|| Error::UnknownScheme(scheme.to_string()))
    }

    /// Build a dialer from one transport URL.
    pub fn create_dialer(&self, config: &str, upstream: Option<Arc<dyn Dialer>>) -> Result<Arc<dyn Dialer>> {
        let url = TransportUrl::parse(config)?;
        (self.entry(&url.scheme)?.dialer)(&url, upstream)
    }

    /// Build a server from a (possibly chained) configuration string.
    pub fn create_server(&self, config: &str, selector: Arc<dyn Selector>) -> Result<Arc<dyn Server>> {
        let chain = Chain::parse(config)?;
        self.build_server(&chain, selector)
    }

    /// Build a server from an already parsed chain node.
    pub fn build_server(&self, chain: &Chain, selector: Arc<dyn Selector>) -> Result<Arc<dyn Server>> {
        (self.entry(chain.scheme())?.server)(chain, selector, self)
    }

    /// Build a forwarder from a comma separated dialer chain.
    ///
    /// `a,b` dials `a` directly and tunnels `b` through it; the last link is
    /// the returned dialer.
    pub fn create_forwarder(&self, config: &str) -> Result<Arc<dyn Dialer>> {
        let mut dialer: Option<Arc<dyn Dialer>> = None;
        for link in config.split(',').map(str::trim).filter(|l| !l.is_empty()) {
            dialer = Some(self.create_dialer(link, dialer)?);
        }
        dialer.ok_or_else(|| Error::config(config, "empty forwarder"))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
