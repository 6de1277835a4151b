use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use edgecore::config::Config;
use edgecore::ingest::IngestService;
use edgecore::perfmon::{self, PerfMonRegistry};
use edgecore::storage::{self, StorageEngine};

#[tokio::main]
async fn main() -> Result<(), edgecore::CoreError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("EDGECORE_LOG").unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let cfg = Config::load();
    tracing::info!(listen = %cfg.south_listen, "starting south ingest");

    let pool = storage::connect(&cfg.database_url).await?;
    let storage = Arc::new(StorageEngine::new(pool));

    let perf_registry = Arc::new(PerfMonRegistry::new());
    perf_registry.set_collecting(true);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());

    let perf_task = tokio::spawn(perfmon::housekeeper(
        perf_registry.clone(),
        storage.clone(),
        "south".to_string(),
        Duration::from_secs(cfg.perf_flush_interval_secs),
        shutdown_rx,
    ));

    let ingest = IngestService::start(
        cfg.drain_threshold,
        Duration::from_millis(cfg.drain_timeout_ms),
        Duration::from_secs(cfg.perf_flush_interval_secs),
        storage.clone(),
        tokio::runtime::Handle::current(),
    );

    edgecore::shutdown_signal().await;
    tracing::info!("shutting down south ingest");

    let _ = shutdown_tx.send(());
    ingest.shutdown();
    let _ = perf_task.await;

    tracing::info!("south ingest stopped");
    Ok(())
}
