//! Application Layer
//!
//! - Runtime: builds forwarders, the selector and the servers from
//!   configuration, then runs every listener until shutdown

mod runtime;

pub use runtime::Runtime;
