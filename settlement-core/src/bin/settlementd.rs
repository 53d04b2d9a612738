//! Settlement daemon
//!
//! Runs the billing and tracking sweeps until interrupted. Configuration
//! comes from the file named by `SETTLEMENT_CONFIG`, or from `SETTLEMENT_*`
//! environment variables.

use anyhow::Context;
use settlement_core::{Config, ShippingSettlement};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting settlement daemon");

    let config = match std::env::var("SETTLEMENT_CONFIG") {
        Ok(path) => {
            tracing::info!(path = %path, "Loading config from file");
            Config::from_file(&path).with_context(|| format!("loading {}", path))?
        }
        Err(_) => {
            tracing::info!("Loading config from environment variables");
            Config::from_env().context("reading SETTLEMENT_* variables")?
        }
    };

    let settlement = Arc::new(ShippingSettlement::open(config).context("opening settlement core")?);
    let tasks = settlement.spawn_background_tasks();
    tracing::info!(tasks = tasks.len(), "Sweeps running");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down settlement daemon");
    for task in tasks {
        task.abort();
    }
    Ok(())
}
