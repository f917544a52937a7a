//! Windowed motor-intent inference
//!
//! - [`window`]: overwriting ring buffer of the last W samples
//! - [`classifier`]: window → class distribution (trait + log-variance model)
//! - [`history`]: bounded prediction history
//! - [`engine`]: stride scheduling and two-gate consensus
//! - [`intent`]: discrete command for downstream consumers

pub mod classifier;
pub mod engine;
pub mod history;
pub mod intent;
pub mod window;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Samples per classification window (2 s at 125 Hz)
pub const DEFAULT_WINDOW_SIZE: usize = 250;

/// Samples between classifications once the window is full
pub const DEFAULT_STRIDE: usize = 25;

/// Predictions retained for consensus
pub const DEFAULT_HISTORY_LEN: usize = 10;

/// Minimum confidence of the latest window
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.65;

/// Minimum share of the history agreeing with the latest label
pub const DEFAULT_MIN_FRACTION: f64 = 0.7;

/// Inference tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub window_size: usize,
    pub stride: usize,
    pub history_len: usize,
    pub min_confidence: f64,
    pub min_fraction: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            stride: DEFAULT_STRIDE,
            history_len: DEFAULT_HISTORY_LEN,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            min_fraction: DEFAULT_MIN_FRACTION,
        }
    }
}

/// Errors raised while feeding the engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("sample has {got} channels, window expects {expected}")]
    ChannelMismatch { expected: usize, got: usize },
}
