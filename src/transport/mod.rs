//! Transport Layer
//!
//! Responsibilities:
//! - Dial outbound connections, directly or through another dialer
//! - Listen, accept and serve inbound connections
//! - Hand accepted connections to the selector and relay them
//!
//! Every transport is both a [`Dialer`] and a [`Server`]; which role an
//! instance plays is decided by the registry factory that built it.

mod tcp;
pub mod tls;

pub use tcp::TcpTransport;
pub use tls::TlsTransport;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{error, info, warn};

use crate::common::address::{self, Family};
use crate::common::{relay, Conn};
use crate::error::{Error, RelaySide, Result};
use crate::selector::Selector;

/// Outbound side of a transport
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Address this dialer connects to
    fn addr(&self) -> String;

    /// Open a stream connection
    async fn dial(&self, network: &str, addr: &str) -> Result<Conn>;

    /// Open a datagram socket
    async fn dial_udp(&self, network: &str, addr: &str) -> Result<(UdpSocket, SocketAddr)>;
}

/// Inbound side of a transport
#[async_trait]
pub trait Server: Send + Sync {
    /// Listen address
    fn addr(&self) -> String;

    /// Bind the listen address and serve connections until the process ends.
    ///
    /// Only a bind failure returns; accept failures are logged and skipped.
    async fn listen_and_serve(&self) -> Result<()>;

    /// Serve one connection, taking ownership of it
    async fn serve(&self, conn: Conn);
}

/// Bind a listener for `scheme` on `addr`.
pub(crate) async fn bind(tag: &str, scheme: &str, addr: &str) -> Result<TcpListener> {
    let bind = async {
        let addrs = address::resolve(addr, Family::from_scheme(scheme)).await?;
        TcpListener::bind(&addrs[..]).await.map_err(Error::Io)
    };

    bind.await.map_err(|e| {
        error!("[{}] failed to listen on {}: {}", tag, addr, e);
        let source = match e {
            Error::Io(io) => io,
            other => std::io::Error::new(std::io::ErrorKind::InvalidInput, other.to_string()),
        };
        Error::ListenFailed {
            addr: addr.to_string(),
            source,
        }
    })
}

/// Accept loop shared by all transports.
///
/// Each connection gets its own task, so a stuck peer never blocks accepts.
pub(crate) async fn accept_loop<S>(tag: &'static str, server: S, listener: TcpListener)
where
    S: Server + Clone + 'static,
{
    let mut conn_count: u64 = 0;

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                conn_count += 1;
                let server = server.clone();
                tokio::spawn(async move {
                    server.serve(Conn::from_tcp(stream)).await;
                });
            }
            Err(e) => {
                let e = Error::AcceptFailed(e);
                error!("[{}] {} (after {} connections)", tag, e, conn_count);
            }
        }
    }
}

/// Dial straight to `addr`, restricted to the address family of `scheme`.
pub(crate) async fn dial_direct(scheme: &str, addr: &str) -> Result<Conn> {
    let addrs = address::resolve(addr, Family::from_scheme(scheme)).await?;
    let stream = TcpStream::connect(&addrs[..])
        .await
        .map_err(|source| Error::DialFailed {
            addr: addr.to_string(),
            source,
        })?;
    Ok(Conn::from_tcp(stream))
}

/// Serve an accepted connection by relaying it to an upstream picked by the
/// selector, recording upstream failures.
pub(crate) async fn forward(tag: &str, listen_addr: &str, selector: &dyn Selector, conn: Conn) {
    match conn.set_keepalive() {
        Ok(_) => {}
        Err(e) => warn!("[{}] {} failed to enable keep-alive: {}", tag, conn.peer(), e),
    }

    let (dialer, result) = selector.dial("tcp", "").await;
    let rc = match result {
        Ok(rc) => rc,
        Err(e) => {
            error!(
                "[{}] {} <-> {} via {}, error in dial: {}",
                tag,
                conn.peer(),
                listen_addr,
                dialer.addr(),
                e
            );
            selector.record(&dialer, false);
            return;
        }
    };

    let peer = conn.peer();
    info!("[{}] {} <-> {}", tag, peer, dialer.addr());

    match relay(conn, rc).await {
        Ok((up, down)) => {
            info!("[{}] {} <-> {} closed (up {}B, down {}B)", tag, peer, dialer.addr(), up, down);
        }
        Err(e) => {
            let e = Error::Relay(e);
            warn!("[{}] {} <-> {}, relay error: {}", tag, peer, dialer.addr(), e);
            // record remote conn failure only
            if blames_upstream(&e, listen_addr) {
                selector.record(&dialer, false);
            }
        }
    }
}

/// Whether a relay failure should count against the upstream.
///
/// Failures on the accepted side, or whose text names the listener's own
/// address, belong to the local end. Every text contains the empty address,
/// so an anonymous nested server never blames its upstream.
pub fn blames_upstream(err: &Error, listen_addr: &str) -> bool {
    if let Error::Relay(relay) = err {
        if relay.side == RelaySide::Inbound {
            return false;
        }
    }
    !err.to_string().contains(listen_addr)
}

/// Address of a dialer-role transport: its own, else its upstream's.
pub(crate) fn dialer_addr(addr: &str, upstream: Option<&Arc<dyn Dialer>>) -> String {
    match upstream {
        Some(upstream) if addr.is_empty() => upstream.addr(),
        _ => addr.to_string(),
    }
}

/// Announce a bound listener.
pub(crate) fn log_listening(tag: &str, listener: &TcpListener, extra: &str) {
    match listener.local_addr() {
        Ok(addr) => info!("[{}] listening TCP on {}{}", tag, addr, extra),
        Err(_) => info!("[{}] listening TCP{}", tag, extra),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RelayError, RelayOp};

    fn relay_error(side: RelaySide, local: &str) -> Error {
        Error::Relay(RelayError {
            side,
            op: RelayOp::Read,
            local: local.to_string(),
            peer: "10.0.0.9:443".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"),
        })
    }

    #[test]
    fn test_local_address_in_error_is_not_blamed() {
        let err = relay_error(RelaySide::Outbound, "127.0.0.1:8443");
        assert!(!blames_upstream(&err, "127.0.0.1:8443"));

        let err = relay_error(RelaySide::Outbound, "127.0.0.1:50123");
        assert!(blames_upstream(&err, "127.0.0.1:8443"));
    }

    #[test]
    fn test_inbound_side_is_not_blamed() {
        let err = relay_error(RelaySide::Inbound, "127.0.0.1:50123");
        assert!(!blames_upstream(&err, "127.0.0.1:8443"));
    }

    #[test]
    fn test_plain_errors_use_text_rule() {
        let err = Error::Io(std::io::Error::other("write tcp 0.0.0.0:1080: broken pipe"));
        assert!(!blames_upstream(&err, "0.0.0.0:1080"));
        assert!(blames_upstream(&err, "0.0.0.0:9090"));
        assert!(!blames_upstream(&err, ""));
    }
}
