//! Error types for the transport layer

use std::fmt;
use std::io;

use thiserror::Error;

/// Main error type for netium-transport
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed transport configuration string
    #[error("invalid transport config `{config}`: {reason}")]
    ConfigParse { config: String, reason: String },

    #[error("[tls] cert and key file path must be specified")]
    MissingCredentials,

    /// Credential files exist in config but cannot be used
    #[error("[tls] unable to load {path}: {reason}")]
    Credentials { path: String, reason: String },

    #[error("unknown transport scheme: {0}")]
    UnknownScheme(String),

    #[error("failed to listen on {addr}: {source}")]
    ListenFailed { addr: String, source: io::Error },

    #[error("failed to accept: {0}")]
    AcceptFailed(io::Error),

    #[error("dial to {addr} error: {source}")]
    DialFailed { addr: String, source: io::Error },

    #[error("tls handshake with {server_name} failed: {source}")]
    HandshakeFailed { server_name: String, source: io::Error },

    #[error("TLS config error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("not supported: {0}")]
    NotSupported(&'static str),
}

impl Error {
    /// `ConfigParse` for `config`
    pub fn config(config: &str, reason: impl Into<String>) -> Self {
        Error::ConfigParse {
            config: config.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for netium-transport
pub type Result<T> = std::result::Result<T, Error>;

/// Which connection of a relayed pair failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaySide {
    /// The accepted connection (local side)
    Inbound,
    /// The connection dialed through the selector (remote side)
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOp {
    Read,
    Write,
}

impl fmt::Display for RelayOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayOp::Read => f.write_str("read"),
            RelayOp::Write => f.write_str("write"),
        }
    }
}

/// Failure of one direction of a relay.
///
/// Rendered like `read 127.0.0.1:8443->127.0.0.1:50312: connection reset`,
/// naming the local and peer address of the connection that failed.
#[derive(Error, Debug)]
#[error("{op} {local}->{peer}: {source}")]
pub struct RelayError {
    pub side: RelaySide,
    pub op: RelayOp,
    pub local: String,
    pub peer: String,
    #[source]
    pub source: io::Error,
}
