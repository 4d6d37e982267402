use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use super::api::{self, AppState};
use super::db::{AnalysisDb, DbHandle};
use super::dispatch::HttpDispatcher;
use super::orchestrator::{Orchestrator, OrchestratorSettings};
use super::poller;
use crate::config::ServiceConfig;

/// Configuration for the analysis server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub analyzer_url: String,
    pub request_timeout: Duration,
    pub sweep_interval: Duration,
    pub settings: OrchestratorSettings,
    /// Permissive CORS for local front-end development.
    pub dev_mode: bool,
}

impl ServerConfig {
    pub fn from_service(config: &ServiceConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.server.db_path.clone(),
            analyzer_url: config.analyzer.url.clone(),
            request_timeout: config.request_timeout(),
            sweep_interval: config.sweep_interval(),
            settings: OrchestratorSettings::from_config(config),
            dev_mode: false,
        }
    }
}

/// Build the full application router with request tracing.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Bind and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    serve(listener, config, shutdown_signal()).await
}

/// Run the service on an already-bound listener until `shutdown` resolves.
///
/// Startup runs one stale sweep and resumes pollers for jobs a previous
/// process left in `processing`.
pub async fn serve<F>(listener: tokio::net::TcpListener, config: ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let db = AnalysisDb::new(&config.db_path).context("Failed to initialize analysis database")?;
    let db = DbHandle::new(db);
    let dispatcher = HttpDispatcher::new(&config.analyzer_url, config.request_timeout)?;
    let orchestrator = Orchestrator::new(db.clone(), Arc::new(dispatcher), config.settings);

    let swept = orchestrator.sweep_stale().await?;
    let resumed = orchestrator.resume_pollers().await?;
    info!(swept, resumed, "Recovered in-flight analyses");
    let sweeper = tokio::spawn(poller::run_sweeper(orchestrator.clone(), config.sweep_interval));

    let state = Arc::new(AppState {
        db,
        orchestrator: orchestrator.clone(),
    });
    let app = build_router(state, config.dev_mode);

    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        analyzer = %config.analyzer_url,
        db = %config.db_path.display(),
        "CodeSage listening"
    );

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error");

    sweeper.abort();
    orchestrator.shutdown().await;
    info!("Server shut down gracefully");
    result
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
