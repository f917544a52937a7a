//! Recording session identity

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Experiment task being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Baseline,
    Training,
    Test,
    Game,
}

impl Task {
    pub const ALL: [Task; 4] = [Task::Baseline, Task::Training, Task::Test, Task::Game];

    /// Label used in file names
    pub fn label(self) -> &'static str {
        match self {
            Task::Baseline => "baseline",
            Task::Training => "training",
            Task::Test => "test",
            Task::Game => "game",
        }
    }

    /// Tasks in which manual markers drive the stimulus consumer
    pub fn forwards_triggers(self) -> bool {
        !matches!(self, Task::Baseline)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown task: {0:?}")]
pub struct UnknownTask(pub String);

impl FromStr for Task {
    type Err = UnknownTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Task::ALL
            .into_iter()
            .find(|t| t.label() == lower)
            .ok_or_else(|| UnknownTask(s.to_string()))
    }
}

/// One recording: who, what, when, and where it is written
///
/// The path arrives fully resolved; naming and sanitisation happen upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingSession {
    pub patient_id: String,
    pub task: Task,
    pub started_at: DateTime<Local>,
    pub path: PathBuf,
}

impl RecordingSession {
    /// Session starting now
    pub fn new(patient_id: impl Into<String>, task: Task, path: impl Into<PathBuf>) -> Self {
        Self::started_at(patient_id, task, Local::now(), path)
    }

    pub fn started_at(
        patient_id: impl Into<String>,
        task: Task,
        started_at: DateTime<Local>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            task,
            started_at,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
