//! Relay - bidirectional copy between two connections
//!
//! Each direction copies until EOF or error, then shuts down the write side
//! of its destination. Once one direction is done the other gets a bounded
//! drain window before the pair is torn down, so a peer that never closes
//! cannot pin the task forever.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::common::Conn;
use crate::error::{RelayError, RelayOp, RelaySide};

/// Default buffer size for relay operations (32KB)
const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// How long the remaining direction may run after the first one finished
const RELAY_DRAIN_WAIT: Duration = Duration::from_secs(5);

/// Addresses of one relayed connection, captured before it is split.
struct Endpoint {
    side: RelaySide,
    local: String,
    peer: String,
}

impl Endpoint {
    fn of(conn: &Conn, side: RelaySide) -> Self {
        Self {
            side,
            local: conn.local(),
            peer: conn.peer(),
        }
    }

    fn error(&self, op: RelayOp, source: std::io::Error) -> RelayError {
        RelayError {
            side: self.side,
            op,
            local: self.local.clone(),
            peer: self.peer.clone(),
            source,
        }
    }
}

/// Relay data between an accepted connection and its upstream.
///
/// Returns `(uploaded, downloaded)` byte counts, or the first error seen.
/// A direction cut off by the drain window reports what it copied so far.
/// Both connections are closed when this returns.
pub async fn relay(inbound: Conn, outbound: Conn) -> Result<(u64, u64), RelayError> {
    relay_with_drain(inbound, outbound, RELAY_DRAIN_WAIT).await
}

async fn relay_with_drain(
    inbound: Conn,
    outbound: Conn,
    drain_wait: Duration,
) -> Result<(u64, u64), RelayError> {
    let in_ep = Endpoint::of(&inbound, RelaySide::Inbound);
    let out_ep = Endpoint::of(&outbound, RelaySide::Outbound);

    let (mut in_reader, mut in_writer) = tokio::io::split(inbound);
    let (mut out_reader, mut out_writer) = tokio::io::split(outbound);

    let uploaded = AtomicU64::new(0);
    let downloaded = AtomicU64::new(0);

    let result = {
        let upload = copy_half(&mut in_reader, &mut out_writer, &in_ep, &out_ep, &uploaded);
        let download = copy_half(&mut out_reader, &mut in_writer, &out_ep, &in_ep, &downloaded);
        tokio::pin!(upload, download);

        let first = tokio::select! {
            up = &mut upload => Finished::Upload(up),
            down = &mut download => Finished::Download(down),
        };
        match first {
            Finished::Upload(up) => up.and(drain(drain_wait, download).await),
            Finished::Download(down) => drain(drain_wait, upload).await.and(down),
        }
    };
    result?;

    let (up, down) = (uploaded.into_inner(), downloaded.into_inner());
    trace!("relay finished: up={} down={}", up, down);
    Ok((up, down))
}

enum Finished {
    Upload(Result<(), RelayError>),
    Download(Result<(), RelayError>),
}

async fn drain<F>(wait: Duration, rest: F) -> Result<(), RelayError>
where
    F: Future<Output = Result<(), RelayError>>,
{
    // An expired drain window is a normal end of the relay, not a failure
    tokio::time::timeout(wait, rest)
        .await
        .unwrap_or(Ok(()))
}

async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    src: &Endpoint,
    dst: &Endpoint,
    copied: &AtomicU64,
) -> Result<(), RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::zeroed(RELAY_BUFFER_SIZE);

    let result = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(src.error(RelayOp::Read, e)),
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            break Err(dst.error(RelayOp::Write, e));
        }
        if let Err(e) = writer.flush().await {
            break Err(dst.error(RelayOp::Write, e));
        }

        copied.fetch_add(n as u64, Ordering::Relaxed);
    };

    // Always try to shutdown so the far side sees EOF
    let _ = writer.shutdown().await;
    result
}
