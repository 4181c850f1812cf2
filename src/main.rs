// =============================================================================
// Procyon — Main Entry Point
// =============================================================================
//
// Streams 1-second candles from Upbit, aggregates them to the strategy
// timeframe, and runs the decision pipeline against a paper broker. The
// chart data API serves the accumulated series for visualization.
// =============================================================================

mod broker;
mod chart;
mod config;
mod consumer;
mod dataframe;
mod engine;
mod error;
mod feed;
mod indicators;
mod strategy;
mod timeframe;
mod types;
mod upbit;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::engine::Engine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Procyon starting up");

    let mut settings = Settings::load("procyon.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load settings, using defaults");
        Settings::default()
    });
    settings.apply_env_overrides();

    info!(
        pairs = ?settings.pairs,
        timeframe = %settings.timeframe,
        chart_addr = %settings.chart_addr,
        "configured"
    );

    let mut engine = Engine::new(settings)?;
    engine.setup_subscriptions().await;
    engine.start().await;

    info!("all subsystems running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    engine.stop().await;
    info!("shutdown complete");
    Ok(())
}
