//! Meshwork Node binary
//!
//! Presence, map feed, SV and signal backend for the ÆSC Trust site.

use aesc_meshwork::{MeshworkConfig, MeshworkNode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshwork_node=info,aesc_meshwork=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Meshwork Node");

    let config = MeshworkConfig::from_env()?;

    // Create and run node
    let node = MeshworkNode::new(config).await?;
    node.run().await?;

    Ok(())
}
