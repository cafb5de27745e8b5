//! # Quantum-Chain Node Runtime
//!
//! Entry point: logging, configuration, then the overlay node until Ctrl+C.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use node_runtime::container::{NodeConfig, OverlayNode};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let config = NodeConfig::from_env().context("invalid node configuration")?;
    let provider = config
        .overlay_provider()
        .context("loading overlay configuration")?;

    let node = OverlayNode::start(config.listen, config.node_key(), provider.get_overlay_config())
        .await
        .context("starting the overlay node")?;

    let seeds = provider.get_bootstrap_nodes();
    if seeds.is_empty() {
        info!("No bootstrap nodes configured, waiting for inbound peers");
    } else {
        node.bootstrap(&seeds).await;
    }

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;

    node.shutdown().await;
    Ok(())
}
