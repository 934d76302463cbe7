//! qa-server service entry point.

use anyhow::{Context, Result};
use qa_common::config::Config;
use qa_common::logging::init_logging;
use qa_server::{build_router, with_request_timeout, AppState};
use qa_session::{build_object_store, ChatSessionManager, HttpQaCapability, ManagerSettings, SnapshotStore};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Upper bound on request body size.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    let config = Config::load_and_validate()?;
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("QA Server v{}", env!("CARGO_PKG_VERSION"));

    let snapshot_dir = config.snapshot.resolved_dir();
    let snapshots = SnapshotStore::new(&snapshot_dir)
        .with_context(|| format!("Failed to open snapshot dir {}", snapshot_dir.display()))?;
    let object_store = build_object_store(&config.object_store)?;
    let capability = HttpQaCapability::from_config(&config.qa)?;

    tracing::info!(
        snapshot_dir = %snapshot_dir.display(),
        object_store = object_store.name(),
        bucket = %config.object_store.bucket,
        expiry = ?config.session.expiry,
        session_timeout_secs = config.session.timeout_secs,
        "Session store configured"
    );

    let manager = Arc::new(ChatSessionManager::new(
        ManagerSettings::from_config(&config),
        snapshots,
        object_store,
        Arc::new(capability),
    ));
    manager.start_eviction().await;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = with_request_timeout(
        build_router(AppState::new(Arc::clone(&manager))),
        config.server.request_timeout(),
    )
    .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
    .layer(cors);

    let addr = config.listen_address();

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    }
}
