//! Rollup Agent - fleet metric roll-up service
//!
//! Samples every discovered project, cluster, namespace, workload and pod
//! autoscaler once a minute, rolls the samples up into hour and day buckets
//! and serves the results over HTTP.

use anyhow::{Context, Result};
use rollup_agent::{api, config::AgentConfig};
use rollup_lib::{
    discovery::HttpDiscovery,
    health::HealthRegistry,
    job::JobDriverBuilder,
    metric::GetterSet,
    observability::StructuredLogger,
    policy::{PolicyClients, PolicyRegistry},
    source::{MetricSource, PrometheusSource, RetryingSource},
    store::Stores,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting rollup-agent");

    let config = AgentConfig::load()?;
    info!(node_name = %config.node_name, metric_source = %config.metric_source_url, "Agent configured");

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(AGENT_VERSION, &config.metric_source_url);

    // Metric source with per-call deadlines and retries
    let prometheus = PrometheusSource::new(&config.metric_source_url, config.query_timeout())
        .context("Failed to create metric source client")?;
    let source: Arc<dyn MetricSource> = Arc::new(RetryingSource::new(prometheus, config.retry_config()));
    let getters = GetterSet::from_source(source.clone(), config.counter_config());

    let discovery = HttpDiscovery::new(&config.discovery_url, config.query_timeout())
        .context("Failed to create discovery client")?;

    let stores = match &config.persistence_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Loading bucket snapshots");
            Stores::open(dir).context("Failed to open bucket store")?
        }
        None => Stores::in_memory(),
    };

    let clients = PolicyClients::new(getters, Arc::new(discovery), stores.clone())
        .with_suggestion_headroom(config.suggestion_headroom);

    let driver = JobDriverBuilder::new()
        .registry(Arc::new(PolicyRegistry::new()))
        .clients(clients)
        .health(health_registry.clone())
        .logger(logger.clone())
        .probe(source)
        .config(config.job_config())
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let driver_handle = tokio::spawn(driver.run(shutdown_rx));

    // Health, metrics and read API
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), stores));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task failed"),
                Ok(Ok(())) => {}
            }
            logger.log_shutdown("API server stopped");
        }
    }

    info!("Shutting down");
    // Stops the driver, which flushes the stores on its way out
    let _ = shutdown_tx.send(());
    if let Err(e) = driver_handle.await {
        error!(error = %e, "Job driver task failed");
    }

    Ok(())
}
