//! Parley - Main entry point.

use anyhow::{Context, Result};
use parley_bot::start_bot;
use parley_common::config::Config;
use parley_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    config.validate().context("Invalid configuration")?;

    tracing::info!("Parley v{}", env!("CARGO_PKG_VERSION"));

    start_bot(&config).await
}
