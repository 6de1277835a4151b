pub mod config;
pub mod error;
pub mod ingest;
pub mod json;
pub mod model;
pub mod north;
pub mod perfmon;
pub mod sql;
pub mod storage;

pub use error::CoreError;

/// Resolves once Ctrl+C or SIGTERM is received. Shared bootstrap for both
/// binaries.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
