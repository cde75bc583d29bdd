#![forbid(unsafe_code)]
//! ledgerline node: HTTP API plus UDP block listener

use clap::Parser;
use ledgerline::config::{load_config, DEFAULT_CONFIG_PATH};
use ledgerline::node::Node;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// HTTP API port, overriding the configuration
    #[arg(long)]
    port: Option<u16>,
    /// UDP block listener port, overriding the configuration
    #[arg(long)]
    udp_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = load_config(&args.config)?;
    if let Some(port) = args.port {
        config.network.api_port = port;
    }
    if let Some(port) = args.udp_port {
        config.network.udp_port = port;
    }

    let node = match Node::open(config) {
        Ok(node) => Arc::new(node),
        Err(e) => {
            error!(error = %e, "cannot open storage");
            std::process::exit(1);
        }
    };
    node.bootstrap().await;

    tokio::select! {
        result = node.clone().serve() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
            node.shutdown().await;
        }
    }
    Ok(())
}
