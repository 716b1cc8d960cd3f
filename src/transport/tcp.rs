//! TCP Transport implementation
//!
//! Schemes `tcp`, `tcp4` and `tcp6`; the scheme picks the address family
//! used for listening and direct dialing.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, UdpSocket};
use tracing::error;

use crate::common::{Conn, Result, TransportUrl};
use crate::error::Error;
use crate::selector::Selector;

use super::{accept_loop, bind, dial_direct, dialer_addr, forward, log_listening, Dialer, Server};

/// TCP transport - plain stream sockets
#[derive(Clone)]
pub struct TcpTransport {
    addr: String,
    scheme: String,
    upstream: Option<Arc<dyn Dialer>>,
    selector: Option<Arc<dyn Selector>>,
}

impl TcpTransport {
    fn from_url(url: &TransportUrl) -> Self {
        Self {
            addr: url.host.clone(),
            scheme: url.scheme.clone(),
            upstream: None,
            selector: None,
        }
    }

    /// Dialer role: tunnel through `upstream`, or dial directly when `None`.
    pub fn dialer(url: &TransportUrl, upstream: Option<Arc<dyn Dialer>>) -> Self {
        Self {
            upstream,
            ..Self::from_url(url)
        }
    }

    /// Server role: relay every accepted connection through `selector`.
    pub fn server(url: &TransportUrl, selector: Arc<dyn Selector>) -> Self {
        Self {
            selector: Some(selector),
            ..Self::from_url(url)
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Serve connections from an already bound listener.
    pub async fn serve_listener(&self, listener: TcpListener) {
        log_listening(self.tag(), &listener, "");
        accept_loop(self.tag(), self.clone(), listener).await
    }

    fn tag(&self) -> &'static str {
        match self.scheme.as_str() {
            "tcp4" => "tcp4",
            "tcp6" => "tcp6",
            _ => "tcp",
        }
    }
}

#[async_trait]
impl Dialer for TcpTransport {
    fn addr(&self) -> String {
        dialer_addr(&self.addr, self.upstream.as_ref())
    }

    async fn dial(&self, _network: &str, _addr: &str) -> Result<Conn> {
        match &self.upstream {
            Some(upstream) => upstream.dial("tcp", &self.addr).await,
            None => dial_direct(&self.scheme, &self.addr).await,
        }
    }

    async fn dial_udp(&self, _network: &str, _addr: &str) -> Result<(UdpSocket, SocketAddr)> {
        Err(Error::NotSupported("tcp transport has no datagram mode"))
    }
}

#[async_trait]
impl Server for TcpTransport {
    fn addr(&self) -> String {
        self.addr.clone()
    }

    async fn listen_and_serve(&self) -> Result<()> {
        let listener = bind(self.tag(), &self.scheme, &self.addr).await?;
        self.serve_listener(listener).await;
        Ok(())
    }

    async fn serve(&self, conn: Conn) {
        match &self.selector {
            Some(selector) => forward(self.tag(), &self.addr, selector.as_ref(), conn).await,
            None => error!("[{}] {} dropped: dialer-only transport cannot serve", self.tag(), conn.peer()),
        }
    }
}
