//! Neurolog Web Server - status surface and control API
//!
//! REST endpoints under `/api/v1/` plus a WebSocket status push, so a
//! presentation layer (local or remote) can poll or subscribe to the
//! acquisition pipeline and drive markers, recording and inference.

pub mod api;
pub mod naming;
pub mod patients;
pub mod ws;

use axum::http::{header, HeaderValue};
use axum::Router;
use naming::RecordingLayout;
use neurolog_core::{PipelineHandle, PipelineStatus};
use patients::PatientDirectory;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the dispatch pipeline
    pub pipeline: PipelineHandle,
    /// Patient id → display name lookups
    pub patients: Arc<dyn PatientDirectory>,
    /// Recording path layout
    pub layout: RecordingLayout,
    /// WebSocket broadcast channel
    pub ws_tx: tokio::sync::broadcast::Sender<String>,
    /// Server configuration
    pub config: ServerConfig,
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Bind address
    pub bind_addr: String,
    /// Period of the status broadcast task
    pub status_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8920,
            bind_addr: "0.0.0.0".to_string(),
            status_interval: Duration::from_secs(1),
        }
    }
}

impl AppState {
    pub fn new(
        pipeline: PipelineHandle,
        patients: Arc<dyn PatientDirectory>,
        layout: RecordingLayout,
        config: ServerConfig,
    ) -> Self {
        let (ws_tx, _) = tokio::sync::broadcast::channel(256);
        Self {
            pipeline,
            patients,
            layout,
            ws_tx,
            config,
        }
    }
}

/// Build the Axum router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", axum::routing::get(api::get_status))
        .route("/api/v1/intent", axum::routing::get(api::get_intent))
        .route("/api/v1/markers", axum::routing::post(api::post_marker))
        .route("/api/v1/exclusive", axum::routing::post(api::start_exclusive))
        .route(
            "/api/v1/recording",
            axum::routing::post(api::start_recording).delete(api::stop_recording),
        )
        .route("/api/v1/inference", axum::routing::post(api::set_inference))
        .route("/api/v1/patients", axum::routing::get(api::list_patients))
        .route("/api/v1/ws", axum::routing::get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

/// Bind the listener; with port 0 the OS picks one
pub async fn bind(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = TcpListener::bind(&addr).await?;
    Ok(listener)
}

/// Serve on an already bound listener until the task is cancelled
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    let status_task = spawn_status_task(state.clone());
    let app = build_router(state);

    tracing::info!(%addr, "Neurolog web server listening");
    let result = axum::serve(listener, app).await;
    status_task.abort();
    result?;
    Ok(())
}

/// Start the web server
pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let listener = bind(&state.config).await?;
    serve(listener, state).await
}

/// Periodic status work, independent of sample order
///
/// Every tick: publish the status to WebSocket clients, log connection-health
/// transitions, and log when an exclusive period ends.
pub fn spawn_status_task(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.status_interval);
        let mut previous: Option<PipelineStatus> = None;
        loop {
            interval.tick().await;
            let status = state.pipeline.status();
            if let Some(prev) = &previous {
                log_transitions(prev, &status);
            }
            ws::broadcast_status(&state, &status);
            previous = Some(status);
        }
    })
}

fn log_transitions(prev: &PipelineStatus, now: &PipelineStatus) {
    if prev.connected && !now.connected {
        tracing::warn!(
            samples = now.samples_dispatched,
            "Sample stream silent, source disconnected"
        );
    } else if !prev.connected && now.connected {
        tracing::info!("Sample stream connected");
    }
    if prev.exclusive_mode_active() && !now.exclusive_mode_active() {
        tracing::info!("Exclusive mode ended, manual markers accepted again");
    }
    if now.packets_dropped > prev.packets_dropped {
        tracing::debug!(
            dropped = now.packets_dropped - prev.packets_dropped,
            total = now.packets_dropped,
            "Malformed packets dropped"
        );
    }
}
