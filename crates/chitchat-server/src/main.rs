//! # ChitChat Server
//!
//! Lamport-ordered broadcast chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (127.0.0.1:50051)
//! chitchat-server
//!
//! # Run with a config file
//! CHITCHAT_CONFIG=/path/to/chitchat.toml chitchat-server
//!
//! # Run with environment variables
//! CHITCHAT_PORT=50051 CHITCHAT_HOST=0.0.0.0 chitchat-server
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chitchat_server=info,chitchat_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting ChitChat server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
