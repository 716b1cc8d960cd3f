//! TLS Transport implementation
//!
//! Dialer role: dial the raw connection (directly or through an upstream
//! dialer) and run a client handshake over it.
//!
//! Server role: wrap every accepted connection in a lazily handshaking TLS
//! stream, then either hand it to a nested server (`tls://...,<chain>`) or
//! relay it through the selector like the TCP transport does.

mod config;
mod lazy;

pub use lazy::{HandshakePhase, LazyTlsStream};

#[cfg(test)]
pub(crate) use config::{build_acceptor, build_connector};

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, UdpSocket};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, error};

use crate::common::address::{host_of, with_default_port};
use crate::common::{Chain, Conn, Result, TransportUrl};
use crate::error::Error;
use crate::registry::Registry;
use crate::selector::Selector;

use super::{accept_loop, bind, dial_direct, dialer_addr, forward, log_listening, Dialer, Server};

/// Port used when a TLS address has none
pub const DEFAULT_TLS_PORT: u16 = 443;

/// What a server-role instance does with a secured connection
#[derive(Clone)]
enum ServeMode {
    /// Terminate locally: relay through the selector
    Relay(Arc<dyn Selector>),
    /// Hand off to a nested server
    Chain(Arc<dyn Server>),
}

#[derive(Clone)]
enum Role {
    Client {
        connector: TlsConnector,
        server_name: ServerName<'static>,
    },
    Server {
        acceptor: TlsAcceptor,
        mode: ServeMode,
    },
}

/// TLS transport
#[derive(Clone)]
pub struct TlsTransport {
    addr: String,
    server_name: String,
    skip_verify: bool,
    cert_file: Option<String>,
    key_file: Option<String>,
    upstream: Option<Arc<dyn Dialer>>,
    role: Role,
}

/// Fields shared by both roles, with defaults applied
struct Settings {
    addr: String,
    server_name: String,
    skip_verify: bool,
    cert_file: Option<String>,
    key_file: Option<String>,
}

impl Settings {
    fn from_url(url: &TransportUrl) -> Self {
        let addr = with_default_port(&url.host, DEFAULT_TLS_PORT);
        let server_name = url
            .get("serverName")
            .unwrap_or_else(|| host_of(&addr))
            .to_string();

        Self {
            addr,
            server_name,
            skip_verify: url.flag("skipVerify"),
            cert_file: url.get("cert").map(str::to_string),
            key_file: url.get("key").map(str::to_string),
        }
    }
}

impl TlsTransport {
    /// Dialer role. `upstream` of `None` dials directly.
    pub fn dialer(url: &TransportUrl, upstream: Option<Arc<dyn Dialer>>) -> Result<Self> {
        let settings = Settings::from_url(url);
        if settings.server_name.is_empty() {
            return Err(Error::config(
                &url.host,
                "tls dialer needs a host or a serverName",
            ));
        }

        let server_name = ServerName::try_from(settings.server_name.clone()).map_err(|_| {
            Error::config(
                &url.host,
                format!("invalid server name {:?}", settings.server_name),
            )
        })?;
        let connector = config::build_connector(settings.skip_verify)?;

        Ok(Self::assemble(
            settings,
            upstream,
            Role::Client {
                connector,
                server_name,
            },
        ))
    }

    /// Server role. Requires `cert` and `key`; a trailing chain becomes the
    /// nested server, built through `registry` with the same selector.
    pub fn server(chain: &Chain, selector: Arc<dyn Selector>, registry: &Registry) -> Result<Self> {
        let mut settings = Settings::from_url(&chain.url);
        if settings.server_name.is_empty() {
            // wildcard listen host; SNI is unused on this side
            settings.server_name = "localhost".to_string();
        }

        let (cert_file, key_file) = match (&settings.cert_file, &settings.key_file) {
            (Some(cert), Some(key)) => (cert, key),
            _ => return Err(Error::MissingCredentials),
        };

        let acceptor = config::build_acceptor(cert_file, key_file).map_err(|e| {
            error!("[tls] unable to load cert: {}, key {}", cert_file, key_file);
            e
        })?;

        let mode = match &chain.next {
            Some(next) => {
                debug!("[tls] chaining to nested {} server", next.scheme());
                ServeMode::Chain(registry.build_server(next, selector)?)
            }
            None => ServeMode::Relay(selector),
        };

        Ok(Self::assemble(settings, None, Role::Server { acceptor, mode }))
    }

    fn assemble(settings: Settings, upstream: Option<Arc<dyn Dialer>>, role: Role) -> Self {
        Self {
            addr: settings.addr,
            server_name: settings.server_name,
            skip_verify: settings.skip_verify,
            cert_file: settings.cert_file,
            key_file: settings.key_file,
            upstream,
            role,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn skip_verify(&self) -> bool {
        self.skip_verify
    }

    pub fn cert_file(&self) -> Option<&str> {
        self.cert_file.as_deref()
    }

    pub fn key_file(&self) -> Option<&str> {
        self.key_file.as_deref()
    }

    /// Whether accepted connections go to a nested server
    pub fn is_chained(&self) -> bool {
        matches!(
            self.role,
            Role::Server {
                mode: ServeMode::Chain(_),
                ..
            }
        )
    }

    /// Serve connections from an already bound listener.
    pub async fn serve_listener(&self, listener: TcpListener) {
        log_listening("tls", &listener, " with TLS");
        accept_loop("tls", self.clone(), listener).await
    }
}

#[async_trait]
impl Dialer for TlsTransport {
    fn addr(&self) -> String {
        dialer_addr(&self.addr, self.upstream.as_ref())
    }

    async fn dial(&self, _network: &str, _addr: &str) -> Result<Conn> {
        let Role::Client {
            connector,
            server_name,
        } = &self.role
        else {
            return Err(Error::NotSupported("tls server instance cannot dial"));
        };

        let raw = match &self.upstream {
            Some(upstream) => upstream.dial("tcp", &self.addr).await,
            None => dial_direct("tcp", &self.addr).await,
        }
        .map_err(|e| {
            error!("[tls] dial to {} error: {}", self.addr, e);
            e
        })?;

        let (local, peer) = (raw.local_addr(), raw.peer_addr());
        // the raw connection moves into the handshake and is closed with it on failure
        let tls = connector
            .connect(server_name.clone(), raw)
            .await
            .map_err(|source| Error::HandshakeFailed {
                server_name: self.server_name.clone(),
                source,
            })?;

        Ok(Conn::new(tls, local, peer))
    }

    async fn dial_udp(&self, _network: &str, _addr: &str) -> Result<(UdpSocket, SocketAddr)> {
        Err(Error::NotSupported("tls transport has no datagram mode"))
    }
}

#[async_trait]
impl Server for TlsTransport {
    fn addr(&self) -> String {
        self.addr.clone()
    }

    async fn listen_and_serve(&self) -> Result<()> {
        if !matches!(self.role, Role::Server { .. }) {
            return Err(Error::NotSupported("tls dialer instance cannot listen"));
        }
        let listener = bind("tls", "tcp", &self.addr).await?;
        self.serve_listener(listener).await;
        Ok(())
    }

    async fn serve(&self, conn: Conn) {
        let Role::Server { acceptor, mode } = &self.role else {
            error!("[tls] {} dropped: dialer-only transport cannot serve", conn.peer());
            return;
        };

        let conn = conn.wrap(|raw| LazyTlsStream::new(acceptor, raw));

        match mode {
            ServeMode::Chain(next) => next.serve(conn).await,
            ServeMode::Relay(selector) => forward("tls", &self.addr, selector.as_ref(), conn).await,
        }
    }
}
