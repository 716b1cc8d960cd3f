//! Shared fixtures for unit tests

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use socket2::SockRef;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpListener;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::common::{Conn, Result, TransportUrl};
use crate::error::Error;
use crate::registry::Registry;
use crate::selector::Selector;
use crate::transport::tls::{build_acceptor, build_connector};
use crate::transport::{Dialer, Server, TcpTransport};

/// Loopback server echoing every connection until EOF.
pub async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.into_split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
                let _ = w.shutdown().await;
            });
        }
    });
    addr
}

/// Loopback server that reads once from each connection, then resets it.
pub async fn reset_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await;
            // zero linger turns the close into an RST
            let _ = SockRef::from(&stream).set_linger(Some(Duration::ZERO));
            drop(stream);
        }
    });
    addr
}

/// Stream whose reads fail with a reset and whose writes are discarded.
pub struct BrokenStream;

impl AsyncRead for BrokenStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }
}

impl AsyncWrite for BrokenStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Selector with a single upstream that counts dials and failures.
pub struct RecordingSelector {
    dialer: Arc<dyn Dialer>,
    fail: bool,
    dials: AtomicUsize,
    failures: AtomicUsize,
}

impl RecordingSelector {
    fn build(target: &str, fail: bool) -> Arc<Self> {
        let url = TransportUrl::parse(&format!("tcp://{}", target)).unwrap();
        Arc::new(Self {
            dialer: Arc::new(TcpTransport::dialer(&url, None)),
            fail,
            dials: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        })
    }

    /// Dial `addr` directly for every connection.
    pub fn to(addr: &str) -> Arc<Self> {
        Self::build(addr, false)
    }

    /// Fail every dial without touching the network.
    pub fn failing() -> Arc<Self> {
        Self::build("127.0.0.1:1", true)
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Selector for RecordingSelector {
    async fn dial(&self, network: &str, addr: &str) -> (Arc<dyn Dialer>, Result<Conn>) {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let result = if self.fail {
            Err(Error::DialFailed {
                addr: self.dialer.addr(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            })
        } else {
            self.dialer.dial(network, addr).await
        };
        (self.dialer.clone(), result)
    }

    fn record(&self, _dialer: &Arc<dyn Dialer>, success: bool) {
        if !success {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Write a self-signed certificate for `name` into `dir`, returning the
/// certificate and key paths.
pub fn write_cert(dir: &Path, name: &str) -> (String, String) {
    let certified = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
    let cert_path = dir.join(format!("{}.crt", name));
    let key_path = dir.join(format!("{}.key", name));
    std::fs::write(&cert_path, certified.cert.pem()).unwrap();
    std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
    (
        cert_path.to_string_lossy().into_owned(),
        key_path.to_string_lossy().into_owned(),
    )
}

/// Acceptor for a `localhost` certificate; keep the directory alive.
pub fn test_acceptor() -> (TlsAcceptor, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let (cert, key) = write_cert(dir.path(), "localhost");
    (build_acceptor(&cert, &key).unwrap(), dir)
}

/// Connector accepting any server certificate.
pub fn test_connector() -> TlsConnector {
    build_connector(true).unwrap()
}

/// Nested server that echoes what it is handed and counts connections.
#[derive(Clone, Default)]
pub struct ProbeServer {
    served: Arc<AtomicUsize>,
}

impl ProbeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the server role of `scheme`; the dialer role is refused.
    pub fn register(&self, registry: &mut Registry, scheme: &str) {
        let probe = self.clone();
        registry.register(
            scheme,
            |_, _| Err(Error::NotSupported("probe has no dialer role")),
            move |_, _, _| Ok(Arc::new(probe.clone()) as Arc<dyn Server>),
        );
    }

    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Server for ProbeServer {
    fn addr(&self) -> String {
        String::new()
    }

    async fn listen_and_serve(&self) -> Result<()> {
        Err(Error::NotSupported("probe only serves handed connections"))
    }

    async fn serve(&self, conn: Conn) {
        self.served.fetch_add(1, Ordering::SeqCst);
        let (mut r, mut w) = tokio::io::split(conn);
        let _ = tokio::io::copy(&mut r, &mut w).await;
        let _ = w.shutdown().await;
    }
}
