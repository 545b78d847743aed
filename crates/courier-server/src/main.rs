//! # Courier Server
//!
//! Realtime private messaging and payment handshake relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! courier
//!
//! # Run with environment variables
//! COURIER_PORT=2001 COURIER_HOST=0.0.0.0 NOTIFIER_PORT=8080 courier
//! ```
//!
//! Settings are read from `courier.toml`, `/etc/courier/courier.toml` or
//! `~/.config/courier/courier.toml`, whichever exists first.

mod config;
mod handlers;
mod metrics;
mod notifier;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,courier_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Courier server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
