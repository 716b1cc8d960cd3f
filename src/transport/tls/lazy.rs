//! Server-side TLS stream with a deferred handshake
//!
//! Accepting a connection only wraps it; the handshake runs when the stream
//! is first read or written, so its cost overlaps with the first real
//! traffic instead of holding up the serving task.
//!
//! ```text
//! Unauthenticated --first poll--> Handshaking --> Established
//!                                            \--> Failed
//! ```

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::server::TlsStream;
use tokio_rustls::{Accept, TlsAcceptor};
use tracing::debug;

use crate::common::Conn;

/// Observable handshake phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Unauthenticated,
    Handshaking,
    Established,
    Failed,
}

enum State {
    Pending { accept: Accept<Conn>, started: bool },
    Established(Box<TlsStream<Conn>>),
    Failed(io::ErrorKind),
}

/// TLS server stream whose handshake is driven by the first I/O call.
pub struct LazyTlsStream {
    state: State,
}

impl LazyTlsStream {
    /// Wrap `conn`. No bytes are exchanged until the stream is polled.
    pub fn new(acceptor: &TlsAcceptor, conn: Conn) -> Self {
        Self {
            state: State::Pending {
                accept: acceptor.accept(conn),
                started: false,
            },
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        match &self.state {
            State::Pending { started: false, .. } => HandshakePhase::Unauthenticated,
            State::Pending { started: true, .. } => HandshakePhase::Handshaking,
            State::Established(_) => HandshakePhase::Established,
            State::Failed(_) => HandshakePhase::Failed,
        }
    }

    /// SNI sent by the client, once established.
    pub fn server_name(&self) -> Option<&str> {
        match &self.state {
            State::Established(tls) => tls.get_ref().1.server_name(),
            _ => None,
        }
    }

    fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.state {
            State::Pending { accept, started } => {
                *started = true;
                match ready!(Pin::new(accept).poll(cx)) {
                    Ok(tls) => {
                        self.state = State::Established(Box::new(tls));
                        Poll::Ready(Ok(()))
                    }
                    Err(e) => {
                        debug!("[tls] handshake failed: {}", e);
                        self.state = State::Failed(e.kind());
                        Poll::Ready(Err(e))
                    }
                }
            }
            State::Established(_) => Poll::Ready(Ok(())),
            State::Failed(kind) => Poll::Ready(Err(handshake_failed(*kind))),
        }
    }

    fn established(&mut self) -> io::Result<Pin<&mut TlsStream<Conn>>> {
        match &mut self.state {
            State::Established(tls) => Ok(Pin::new(tls.as_mut())),
            State::Failed(kind) => Err(handshake_failed(*kind)),
            State::Pending { .. } => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "tls handshake not finished",
            )),
        }
    }
}

fn handshake_failed(kind: io::ErrorKind) -> io::Error {
    io::Error::new(kind, "tls handshake failed")
}

impl AsyncRead for LazyTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_handshake(cx))?;
        this.established()?.poll_read(cx, buf)
    }
}

impl AsyncWrite for LazyTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_handshake(cx))?;
        this.established()?.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.state {
            // nothing buffered before the handshake ran
            State::Pending { started: false, .. } => Poll::Ready(Ok(())),
            _ => {
                ready!(this.poll_handshake(cx))?;
                this.established()?.poll_flush(cx)
            }
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match &mut this.state {
            State::Established(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
            // never authenticated: dropping the raw connection closes it
            State::Pending { .. } | State::Failed(_) => Poll::Ready(Ok(())),
        }
    }
}
