//! netium-transport - TCP/TLS forwarding proxy

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use netium_transport::app::Runtime;
use netium_transport::config::Config;
use netium_transport::error::Result;

#[derive(Parser, Debug)]
#[command(name = "netium-transport", version, about = "TCP/TLS forwarding proxy")]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server chain to listen on, e.g. `tls://:8443?cert=a.crt&key=a.key,tcp://`
    #[arg(short, long)]
    listen: Vec<String>,

    /// Forwarder (dialer chain), e.g. `tcp://10.0.0.1:8080`
    #[arg(short, long)]
    forward: Vec<String>,

    /// Print an example configuration and exit
    #[arg(long)]
    gen_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.gen_config {
        println!("{}", Config::example().to_json()?);
        return Ok(());
    }

    // Load configuration; command line entries extend the file
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_json("{}")?,
    };
    config.listen.extend(args.listen);
    config.forward.extend(args.forward);

    // Initialize logging
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .or_else(|| config.log.level.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    info!("netium-transport v{} starting...", env!("CARGO_PKG_VERSION"));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let runtime = Runtime::from_config(&config)?;
        runtime.run().await
    })?;

    info!("Goodbye!");
    Ok(())
}
