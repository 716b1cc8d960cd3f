//! Common types and abstractions
//!
//! - Conn: a live connection with its addresses
//! - address: host:port helpers
//! - url: transport URLs and chains
//! - relay: bidirectional copy between two connections

pub mod address;
pub mod relay;
mod stream;
pub mod url;

pub use relay::relay;
pub use stream::{AsyncReadWrite, Conn, Stream};
pub use url::{Chain, TransportUrl};

// Re-export error types from crate root
pub use crate::error::{Error, Result};
