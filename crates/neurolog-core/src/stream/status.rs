//! Pipeline status snapshot

use crate::inference::intent::IntentCommand;
use crate::marker::Marker;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Point-in-time view of the pipeline for presentation layers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Simulated source, or a network sample arrived recently
    pub connected: bool,
    pub simulated: bool,
    pub samples_dispatched: u64,
    /// Rows written in the current (or last) recording session
    pub samples_logged: u64,
    pub recording: bool,
    pub recording_path: Option<PathBuf>,
    /// Whole seconds left in exclusive mode, `None` when inactive
    pub exclusive_mode_remaining_secs: Option<u64>,
    pub last_marker: Option<Marker>,
    /// Malformed datagrams skipped by the source
    pub packets_dropped: u64,
    /// Samples not delivered to a full display subscriber
    pub display_dropped: u64,
    /// Samples whose dispatch failed and was skipped
    pub dispatch_failures: u64,
    pub inference_active: bool,
    pub last_intent: Option<IntentCommand>,
}

impl PipelineStatus {
    pub fn exclusive_mode_active(&self) -> bool {
        self.exclusive_mode_remaining_secs.is_some()
    }
}
