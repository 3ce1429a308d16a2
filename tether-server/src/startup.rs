//! Wiring a configured engine and serving it

use crate::{router, AppState};
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tether_config::TetherConfig;
use tether_http::HttpManager;
use tether_js::{start_engine, JsServices};
use tether_runtime::{Engine, StartupReport};
use tether_storage::{Database, SqliteExecutionRepository, SqliteStateStore};
use tracing::{info, warn};

/// Connect the database and start an engine backed by it
///
/// Execution history and script state are persisted in the same database
/// scripts query through `db`.
pub async fn build_engine(config: &TetherConfig) -> Result<Engine> {
    let database = Database::connect(&config.database)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.url))?;

    let executions = Arc::new(SqliteExecutionRepository::new(database.pool().clone()));
    let state = Arc::new(SqliteStateStore::new(database.pool().clone()));
    let http = Arc::new(HttpManager::with_config(config.http.clone()));
    let services = JsServices::new(http, state).with_database(database);

    let builder = Engine::builder(config.engine.clone()).executions(executions);
    let engine = start_engine(builder, services)
        .await
        .context("Failed to start script engine")?;
    Ok(engine)
}

/// Run the configured startup scripts followed by `extra`
pub async fn load_scripts(engine: &Engine, extra: &[PathBuf]) -> Result<StartupReport> {
    let mut paths = engine.config().startup_scripts.clone();
    paths.extend(extra.iter().cloned());

    let report = engine
        .load_startup_scripts(&paths, engine.config().startup_timeout)
        .await?;
    for (path, error) in &report.failed {
        warn!("Startup script {} failed: {}", path.display(), error);
    }
    if !report.timed_out.is_empty() {
        warn!(
            "{} startup script(s) did not finish in time and keep running",
            report.timed_out.len()
        );
    }
    info!("Loaded {} startup script(s)", report.loaded.len());
    Ok(report)
}

/// Serve `engine` until `shutdown` resolves, then drain the job queue
pub async fn serve(
    engine: Engine,
    config: &TetherConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let address = config.server.listen_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Listening on http://{}", listener.local_addr()?);

    let engine = Arc::new(engine);
    let app = router(AppState::new(engine.clone(), config.server.max_body_bytes));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("Server error")?;

    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.shutdown().await,
        Err(_) => warn!("Engine still referenced after shutdown; skipping drain"),
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
