//! Neurolog - biosignal acquisition, annotation and recording service
//!
//! This library re-exports the acquisition pipeline from `neurolog-core` and
//! the status server from `neurolog-server`, and hosts the persisted
//! application configuration used by the `neurolog` binary.

pub mod config;

pub use neurolog_core::{inference, marker, recording, source, stream};
pub use neurolog_server as server;

pub use config::AppConfig;
pub use neurolog_core::{
    open_source, IntentCommand, Marker, Pipeline, PipelineConfig, PipelineHandle, PipelineStatus,
    RecordingSession, SourceConfig, Task,
};
pub use neurolog_core::{DEFAULT_CHANNEL_COUNT, DEFAULT_SAMPLE_RATE, VERSION};
