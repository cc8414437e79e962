//! # Mingle Server
//!
//! Realtime presence, matchmaking, and message-delivery server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! mingle
//!
//! # Run with a config file at one of the default paths
//! # (mingle.toml, /etc/mingle/mingle.toml, ~/.config/mingle/mingle.toml)
//!
//! # Run with environment variables
//! MINGLE_PORT=8080 MINGLE_HOST=0.0.0.0 mingle
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mingle=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Mingle server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
