//! Patient directory
//!
//! The recording path needs a display name for a patient id. Storage is
//! pluggable behind [`PatientDirectory`]; the shipped store is a JSON file
//! holding an array of [`Patient`] records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_hand: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

impl Patient {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            age: None,
            sex: None,
            affected_hand: None,
            notes: String::new(),
        }
    }
}

/// Read-only patient lookup
pub trait PatientDirectory: Send + Sync {
    fn lookup(&self, id: &str) -> Option<Patient>;

    /// All patients, ordered by id
    fn list(&self) -> Vec<Patient>;
}

#[derive(Error, Debug)]
pub enum PatientStoreError {
    #[error("failed to read patient file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid patient file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Patients loaded from a JSON array file
#[derive(Debug, Clone, Default)]
pub struct JsonPatientStore {
    patients: BTreeMap<String, Patient>,
}

impl JsonPatientStore {
    /// Load the file; a missing file is an empty directory
    pub fn load(path: &Path) -> Result<Self, PatientStoreError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No patient file, starting empty");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(PatientStoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let patients: Vec<Patient> =
            serde_json::from_str(&text).map_err(|source| PatientStoreError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(path = %path.display(), count = patients.len(), "Patients loaded");
        Ok(Self::from_patients(patients))
    }

    pub fn from_patients(patients: impl IntoIterator<Item = Patient>) -> Self {
        Self {
            patients: patients.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }
}

impl PatientDirectory for JsonPatientStore {
    fn lookup(&self, id: &str) -> Option<Patient> {
        self.patients.get(id).cloned()
    }

    fn list(&self) -> Vec<Patient> {
        self.patients.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patients.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "P002", "name": "Bruno Costa", "age": 61, "affected_hand": "left"},
                {"id": "P001", "name": "Ana Silva"}
            ]"#,
        )
        .unwrap();

        let store = JsonPatientStore::load(&path).unwrap();
        let ids: Vec<String> = store.list().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["P001", "P002"]);
        let bruno = store.lookup("P002").unwrap();
        assert_eq!(bruno.age, Some(61));
        assert_eq!(bruno.affected_hand.as_deref(), Some("left"));
        assert!(store.lookup("P404").is_none());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPatientStore::load(&dir.path().join("none.json")).unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonPatientStore::load(&path).unwrap_err();
        assert!(matches!(err, PatientStoreError::Parse { .. }));
        assert!(err.to_string().contains("bad.json"));
    }
}
