use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use edgecore::config::Config;
use edgecore::north::{self, HttpTransport, ReqwestTransport};
use edgecore::storage::{self, StorageEngine};

#[tokio::main]
async fn main() -> Result<(), edgecore::CoreError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("EDGECORE_LOG").unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let cfg = Config::load();
    tracing::info!(endpoint = %cfg.north_endpoint, "starting north forwarder");

    let pool = storage::connect(&cfg.database_url).await?;
    let storage = Arc::new(StorageEngine::new(pool));

    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(cfg.north_endpoint.clone(), cfg.omf_producer_token.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());

    let fetch_task = tokio::spawn(north::run_fetch_loop(
        storage,
        transport,
        String::new(),
        "/omf/type".to_string(),
        "/omf".to_string(),
        vec![("Content-Type".to_string(), "application/json".to_string())],
        cfg.north_block_size,
        Duration::from_millis(cfg.north_poll_ms),
        shutdown_rx,
    ));

    edgecore::shutdown_signal().await;
    tracing::info!("shutting down north forwarder");

    let _ = shutdown_tx.send(());
    let _ = fetch_task.await;

    tracing::info!("north forwarder stopped");
    Ok(())
}
