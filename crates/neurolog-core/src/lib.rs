//! Neurolog Core - Biosignal streaming, annotation, recording and inference
//!
//! This library acquires multi-channel biosignal samples over UDP (or from a
//! simulated generator), annotates them with experiment markers, records them
//! in the OpenBCI raw CSV layout, and classifies sliding windows into motor
//! intent commands.

pub mod inference;
pub mod marker;
pub mod recording;
pub mod source;
pub mod stream;

pub use inference::classifier::{ClassLabel, Classifier, LogVarianceModel};
pub use inference::engine::InferenceEngine;
pub use inference::intent::IntentCommand;
pub use marker::{ExclusiveDuration, Marker, MarkerRejection, MarkerState, MarkerTrigger};
pub use recording::format::{read_recording, RecordingFormat};
pub use recording::logger::{LoggerError, SessionLogger};
pub use recording::session::{RecordingSession, Task};
pub use source::{open_source, Sample, SampleSource, SourceConfig};
pub use stream::dispatcher::Dispatcher;
pub use stream::pipeline::{Pipeline, PipelineConfig, PipelineHandle};
pub use stream::status::PipelineStatus;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Nominal acquisition rate of the Cyton+Daisy board (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 125;

/// EEG channels per sample (Cyton+Daisy)
pub const DEFAULT_CHANNEL_COUNT: usize = 16;

/// Samples between a manual marker and its automatic `T0` (3.2 s at 125 Hz)
pub const AUTO_RESET_DELAY_SAMPLES: u64 = 400;

/// Default UDP port the acquisition GUI streams to
pub const DEFAULT_UDP_PORT: u16 = 12345;
