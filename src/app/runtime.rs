//! Runtime - Configuration-driven server construction
//!
//! The runtime is responsible for:
//! - Building forwarders (dialer chains) from configuration
//! - Building the selector shared by every server
//! - Building servers and running their listeners
//! - Managing lifecycle

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::common::Result;
use crate::config::Config;
use crate::error::Error;
use crate::registry::Registry;
use crate::selector::{RoundRobin, Selector};
use crate::transport::{Dialer, Server};

/// Runtime manages the listeners' lifecycle
pub struct Runtime {
    servers: Vec<Arc<dyn Server>>,
    selector: Arc<RoundRobin>,
}

impl Runtime {
    /// Build runtime from configuration with the built-in transports
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_registry(config, &Registry::with_builtin())
    }

    /// Build runtime from configuration using `registry` for every scheme.
    ///
    /// A forwarder or listener that fails to build is logged and skipped;
    /// only an empty forwarder set is fatal.
    pub fn with_registry(config: &Config, registry: &Registry) -> Result<Self> {
        let mut forwarders: Vec<Arc<dyn Dialer>> = Vec::with_capacity(config.forward.len());
        for forward in &config.forward {
            match registry.create_forwarder(forward) {
                Ok(dialer) => {
                    info!("Forwarder: {} via {}", forward, dialer.addr());
                    forwarders.push(dialer);
                }
                Err(e) => error!("Skipping forwarder {}: {}", forward, e),
            }
        }

        let selector = RoundRobin::new(forwarders)
            .ok_or_else(|| Error::config("forward", "no usable forwarder"))?
            .with_max_failures(config.strategy.max_failures);
        let selector = Arc::new(selector);

        let mut servers = Vec::with_capacity(config.listen.len());
        for listen in &config.listen {
            match registry.create_server(listen, selector.clone() as Arc<dyn Selector>) {
                Ok(server) => {
                    info!("Server: {}", listen);
                    servers.push(server);
                }
                Err(e) => error!("Skipping listener {}: {}", listen, e),
            }
        }

        if servers.is_empty() {
            warn!("No listeners configured");
        }

        Ok(Self { servers, selector })
    }

    pub fn servers(&self) -> &[Arc<dyn Server>] {
        &self.servers
    }

    pub fn selector(&self) -> &Arc<RoundRobin> {
        &self.selector
    }

    /// Run every listener until Ctrl-C, or until all of them have stopped.
    pub async fn run(&self) -> Result<()> {
        let mut listeners = JoinSet::new();
        for server in &self.servers {
            let server = server.clone();
            listeners.spawn(async move {
                if let Err(e) = server.listen_and_serve().await {
                    error!("Listener {} stopped: {}", server.addr(), e);
                }
            });
        }

        info!("Started {} listener(s)", self.servers.len());

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    info!("Shutting down...");
                    break;
                }
                joined = listeners.join_next() => {
                    if joined.is_none() {
                        error!("All listeners stopped");
                        break;
                    }
                }
            }
        }

        listeners.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Conn;
    use crate::testutil::echo_server;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config(listen: &[&str], forward: &[&str]) -> Config {
        Config {
            listen: listen.iter().map(|s| s.to_string()).collect(),
            forward: forward.iter().map(|s| s.to_string()).collect(),
            ..Config::example()
        }
    }

    #[test]
    fn test_requires_forwarder() {
        let err = Runtime::from_config(&config(&["tcp://:1080"], &[])).err().unwrap();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let runtime = Runtime::from_config(&config(
            &["tcp://127.0.0.1:1080", "kcp://:1081", "tls://:8443"],
            &["tcp://10.0.0.1:8080", "quic://10.0.0.2:443"],
        ))
        .unwrap();

        assert_eq!(runtime.servers().len(), 1);
        assert_eq!(runtime.servers()[0].addr(), "127.0.0.1:1080");
        assert_eq!(runtime.selector().failures(0), Some(0));
        assert_eq!(runtime.selector().failures(1), None);
    }

    #[test]
    fn test_no_usable_forwarder() {
        let err = Runtime::from_config(&config(&["tcp://:1080"], &["quic://10.0.0.2:443"]))
            .err()
            .unwrap();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_builds_servers() {
        let runtime = Runtime::from_config(&config(
            &["tcp://127.0.0.1:1080", "tcp6://[::1]:1080"],
            &["tcp://10.0.0.1:8080", "tcp://10.0.0.1:8080,tcp://"],
        ))
        .unwrap();
        assert_eq!(runtime.servers().len(), 2);
        assert_eq!(runtime.servers()[0].addr(), "127.0.0.1:1080");
        assert_eq!(runtime.selector().failures(1), Some(0));
    }

    #[tokio::test]
    async fn test_server_relays_to_forwarder() {
        let echo = echo_server().await;
        let forward = format!("tcp://{}", echo);
        let runtime = Runtime::from_config(&config(&["tcp://127.0.0.1:1080"], &[&forward])).unwrap();

        let server = runtime.servers()[0].clone();
        let (mut client, accepted) = tokio::io::duplex(1024);
        let serving = tokio::spawn(async move { server.serve(Conn::new(accepted, None, None)).await });

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        drop(client);
        serving.await.unwrap();
        assert_eq!(runtime.selector().failures(0), Some(0));
    }
}
