//! Recording path layout
//!
//! `<base>/<patientId>_<sanitizedName>/<patientId>_<task>_<YYYYmmdd_HHMMSS>.csv`

use chrono::{DateTime, Local};
use neurolog_core::Task;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Longest folder-name fragment derived from a display name
const MAX_NAME_CHARS: usize = 50;

/// Characters not allowed in file names on common filesystems
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Strip forbidden characters, turn spaces into `_`, cap the length
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !FORBIDDEN.contains(c))
        .map(|c| if c == ' ' { '_' } else { c })
        .take(MAX_NAME_CHARS)
        .collect()
}

/// Patient id that cannot be used as a path component
#[derive(Error, Debug, PartialEq, Eq)]
#[error("patient id {0:?} cannot be used in a recording path")]
pub struct InvalidPatientId(pub String);

/// Ids end up in folder and file names, so they must stay one plain component
pub fn validate_patient_id(patient_id: &str) -> Result<(), InvalidPatientId> {
    let unsafe_char = |c: char| FORBIDDEN.contains(&c) || c.is_control();
    if patient_id.trim().is_empty() || patient_id.contains("..") || patient_id.contains(unsafe_char) {
        return Err(InvalidPatientId(patient_id.to_string()));
    }
    Ok(())
}

/// Where recordings are placed under a base directory
#[derive(Debug, Clone)]
pub struct RecordingLayout {
    base_dir: PathBuf,
}

impl RecordingLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn patient_folder(&self, patient_id: &str, display_name: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}_{}", patient_id, sanitize_name(display_name)))
    }

    pub fn path_for(
        &self,
        patient_id: &str,
        display_name: &str,
        task: Task,
        started_at: DateTime<Local>,
    ) -> Result<PathBuf, InvalidPatientId> {
        validate_patient_id(patient_id)?;
        Ok(self.patient_folder(patient_id, display_name).join(format!(
            "{}_{}_{}.csv",
            patient_id,
            task.label(),
            started_at.format("%Y%m%d_%H%M%S")
        )))
    }
}
