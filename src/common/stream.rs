//! Stream and connection abstractions
//!
//! Every transport hands out a [`Conn`]: an async byte stream plus the
//! addresses of both ends. Layers that wrap a connection (TLS) keep the
//! addresses of the socket underneath.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Boxed async stream used for wrapped connections.
pub type Stream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

enum ConnIo {
    Tcp(TcpStream),
    Wrapped(Stream),
}

/// A live connection, accepted or dialed.
///
/// Dropping a `Conn` closes it.
pub struct Conn {
    io: ConnIo,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

impl Conn {
    /// Wrap a raw TCP socket.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();
        Self {
            io: ConnIo::Tcp(stream),
            local_addr,
            peer_addr,
        }
    }

    /// Wrap any stream, with the addresses of the socket it runs on.
    pub fn new<S>(stream: S, local_addr: Option<SocketAddr>, peer_addr: Option<SocketAddr>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            io: ConnIo::Wrapped(Box::new(stream)),
            local_addr,
            peer_addr,
        }
    }

    /// Layer a new stream on top of this connection, keeping its addresses.
    pub fn wrap<S, F>(self, f: F) -> Conn
    where
        F: FnOnce(Conn) -> S,
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let local_addr = self.local_addr;
        let peer_addr = self.peer_addr;
        Conn::new(f(self), local_addr, peer_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Local address for log lines, `-` when unknown.
    pub fn local(&self) -> String {
        display_addr(self.local_addr)
    }

    /// Peer address for log lines, `-` when unknown.
    pub fn peer(&self) -> String {
        display_addr(self.peer_addr)
    }

    /// Enable TCP keep-alive.
    ///
    /// Returns `Ok(false)` when the connection is not a raw TCP socket.
    pub fn set_keepalive(&self) -> io::Result<bool> {
        match &self.io {
            ConnIo::Tcp(stream) => {
                SockRef::from(stream).set_keepalive(true)?;
                Ok(true)
            }
            ConnIo::Wrapped(_) => Ok(false),
        }
    }
}

fn display_addr(addr: Option<SocketAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string())
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.io {
            ConnIo::Tcp(_) => "tcp",
            ConnIo::Wrapped(_) => "wrapped",
        };
        f.debug_struct("Conn")
            .field("kind", &kind)
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.io {
            ConnIo::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            ConnIo::Wrapped(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.io {
            ConnIo::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            ConnIo::Wrapped(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.io {
            ConnIo::Tcp(s) => Pin::new(s).poll_flush(cx),
            ConnIo::Wrapped(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.io {
            ConnIo::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            ConnIo::Wrapped(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_keepalive_only_on_tcp() {
        let (client, _server) = tokio::io::duplex(64);
        let conn = Conn::new(client, None, None);
        assert!(!conn.set_keepalive().unwrap());
        assert_eq!(conn.peer(), "-");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dialed = TcpStream::connect(addr).await.unwrap();
        let conn = Conn::from_tcp(dialed);
        assert!(conn.set_keepalive().unwrap());
        assert_eq!(conn.peer_addr(), Some(addr));
    }

    #[tokio::test]
    async fn test_wrap_keeps_addresses() {
        let local: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let peer: SocketAddr = "127.0.0.1:2000".parse().unwrap();
        let (client, mut server) = tokio::io::duplex(64);

        let conn = Conn::new(client, Some(local), Some(peer));
        let mut wrapped = conn.wrap(|inner| inner);
        assert_eq!(wrapped.local_addr(), Some(local));
        assert_eq!(wrapped.peer(), "127.0.0.1:2000");

        wrapped.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
