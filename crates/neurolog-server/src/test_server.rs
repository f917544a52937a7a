//! Standalone test server for end-to-end testing
//!
//! Runs the full HTTP surface over a simulated source, so no acquisition
//! hardware or UDP stream is needed. Recordings land in `RECORDINGS_DIR`
//! (default: a `recordings` folder in the working directory) and patients
//! come from `PATIENTS` when set.

use neurolog_core::source::simulated::SimulatedSource;
use neurolog_core::{Pipeline, PipelineConfig};
use neurolog_server::naming::RecordingLayout;
use neurolog_server::patients::{JsonPatientStore, PatientDirectory};
use neurolog_server::{AppState, ServerConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("neurolog=debug".parse().unwrap()),
        )
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8920u16);

    let patients: Arc<dyn PatientDirectory> = match std::env::var("PATIENTS") {
        Ok(path) => match JsonPatientStore::load(std::path::Path::new(&path)) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!("Patient file error: {}", e);
                std::process::exit(1);
            }
        },
        Err(_) => Arc::new(JsonPatientStore::default()),
    };
    let recordings = std::env::var("RECORDINGS_DIR").unwrap_or_else(|_| "recordings".to_string());

    let source = SimulatedSource::new(
        neurolog_core::DEFAULT_CHANNEL_COUNT,
        neurolog_core::DEFAULT_SAMPLE_RATE,
    );
    let pipeline = Pipeline::start(source, PipelineConfig::default());

    let config = ServerConfig {
        port,
        bind_addr: "127.0.0.1".to_string(),
        ..Default::default()
    };
    let state = AppState::new(
        pipeline.clone(),
        patients,
        RecordingLayout::new(recordings),
        config,
    );

    tracing::info!(port, "Test server starting");

    if let Err(e) = neurolog_server::start_server(state).await {
        tracing::error!("Server error: {}", e);
        pipeline.stop();
        std::process::exit(1);
    }
}
