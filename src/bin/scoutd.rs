//! Scout daemon: loads configuration, starts the scheduler and run queue, and
//! serves until Ctrl-C.

use anyhow::Context;
use prometheus_scout::builders::OrchestratorBuilder;
use prometheus_scout::config::OrchestratorConfig;
use prometheus_scout::core::AppResult;
use prometheus_scout::util::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> AppResult<()> {
    init_tracing();

    let config = OrchestratorConfig::from_env()
        .map_err(anyhow::Error::msg)
        .context("loading configuration")?;
    let orchestrator = OrchestratorBuilder::new(config)
        .build()
        .context("starting orchestrator")?;

    let health = orchestrator.health();
    info!(
        timers = health.timers,
        queue_size = health.queue_size,
        catalog_size = health.catalog_size,
        "scoutd ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");
    orchestrator.shutdown().await;
    Ok(())
}
