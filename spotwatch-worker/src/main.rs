//! Spotwatch - electricity spot price worker.
//!
//! Serves cached spot prices over HTTP, announces tomorrow's prices on the
//! notification exchange once they are published, and mirrors user lifecycle
//! events into the price settings store.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spotwatch::orchestrator::{self, shutdown_signal};
use spotwatch::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("spotwatch_starting");

    // Load configuration from environment
    let config = Config::from_env();
    tracing::info!(
        port = config.port,
        market_zone = %config.market_zone,
        poll_window_start = config.poll_window_start_hour,
        poll_window_end = config.poll_window_end_hour,
        poll_interval_secs = config.poll_interval_secs,
        reconnect_max_attempts = config.reconnect_max_attempts,
        price_api_base_url = %config.price_api_base_url,
        "config_loaded"
    );

    orchestrator::run(config, shutdown_signal()).await
}
