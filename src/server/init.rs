//! Server initialization and main run loop
//!
//! Contains the main `run()` function that starts all server components.

use super::config::AppConfig;
use super::loader::load_config;
use super::shutdown::shutdown_signal;
use super::validation::{validate_config, validate_production_config};
use crate::api::UploadDir;
use crate::middleware::auth::BasicAuth;
use crate::websocket::TerminalSettings;
use anyhow::{Context, Result};
use axum::{routing::get, Extension, Router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::info;
use webtop_core::{
    ArchiveBuilder, ConnectionSupervisor, FileGateway, SessionConnector, SupervisorConfig,
};
use webtop_ssh::SshConnector;

/// Everything the handlers share
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<ConnectionSupervisor>,
    pub files: FileGateway,
    pub archives: ArchiveBuilder,
    pub auth: Arc<BasicAuth>,
    pub uploads: UploadDir,
    pub terminal: TerminalSettings,
    /// Front-end assets; `None` serves a plain text banner at `/`
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    /// Wire the shared components around one supervisor
    pub fn new(
        config: &AppConfig,
        supervisor: Arc<ConnectionSupervisor>,
        shutdown: CancellationToken,
    ) -> Self {
        let static_dir = config.server.static_dir.clone();
        Self {
            files: FileGateway::new(supervisor.clone()),
            archives: ArchiveBuilder::new(supervisor.clone(), (&config.archive).into()),
            auth: Arc::new(BasicAuth::from_config(&config.server.auth)),
            uploads: UploadDir(config.server.upload_dir.clone()),
            terminal: TerminalSettings {
                telemetry_interval: config.telemetry.interval(),
                shutdown,
            },
            static_dir: static_dir.is_dir().then_some(static_dir),
            supervisor,
        }
    }
}

/// Build the router with all endpoints
pub fn build_router(state: AppState) -> Router {
    let app = Router::new()
        // Health endpoints
        .merge(crate::api::health_routes())
        // File API (auth applied per-handler via RequireAuth extractor)
        .merge(crate::api::api_router())
        // WebSocket routes
        .merge(crate::websocket::websocket_router())
        .layer(Extension(state.supervisor))
        .layer(Extension(state.files))
        .layer(Extension(state.archives))
        .layer(Extension(state.auth))
        .layer(Extension(state.uploads))
        .layer(Extension(state.terminal))
        .layer(TraceLayer::new_for_http());

    match state.static_dir {
        Some(dir) => {
            info!("Static assets enabled: serving from {}", dir.display());
            app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true))
        }
        None => app.route("/", get(|| async { "WebTop SSH Gateway" })),
    }
}

/// Run the server
pub async fn run() -> Result<()> {
    let config = load_config().context("Failed to load configuration")?;
    info!("Configuration loaded");

    validate_config(&config)?;
    validate_production_config(&config)?;

    let connector: Arc<dyn SessionConnector> = Arc::new(SshConnector::new(config.ssh.clone()));
    let supervisor = ConnectionSupervisor::new(
        connector,
        SupervisorConfig::default()
            .with_reconnect_delay(config.ssh.reconnect_delay())
            .with_connect_timeout(config.ssh.connect_timeout()),
    );
    supervisor.ensure_connected();
    info!(target_host = %config.ssh.target(), "SSH supervisor started");

    tokio::fs::create_dir_all(&config.server.upload_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create upload directory {}",
                config.server.upload_dir.display()
            )
        })?;

    let shutdown = CancellationToken::new();
    let app = build_router(AppState::new(&config, supervisor.clone(), shutdown.clone()));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("HTTP server error")?;

    supervisor.shutdown().await;
    info!("WebTop shutdown complete");
    Ok(())
}
