//! Netium transport layer
//!
//! Pluggable transports for a forwarding proxy. A transport is named by the
//! scheme of a URL-like config string and plays one of two roles:
//!
//! - dialer: opens outbound connections, directly or through another dialer
//! - server: accepts inbound connections and relays them to an upstream
//!   picked by a [`Selector`], or hands them to a nested server
//!
//! ```text
//! client -> [tls server] -> (nested tcp server) -> selector -> [tcp dialer] -> upstream
//! ```
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Conn, addresses, transport URLs, relay
//! ├── transport/       # Dialer/Server traits, TCP and TLS transports
//! ├── selector.rs      # Upstream selection and failure tracking
//! ├── registry.rs      # Scheme -> factory table
//! └── app/             # Runtime
//! ```

// Core types
pub mod common;
pub mod error;

pub mod transport;
pub mod selector;
pub mod registry;
pub mod app;

// Supporting modules
pub mod config;

#[cfg(test)]
mod testutil;

// Re-exports for convenience
pub use common::{Chain, Conn, Stream, TransportUrl};
pub use error::{Error, Result};
pub use config::Config;

pub use app::Runtime;
pub use registry::Registry;
pub use selector::{RoundRobin, Selector};
pub use transport::{Dialer, Server, TcpTransport, TlsTransport};
