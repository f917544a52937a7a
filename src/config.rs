//! Persistent application configuration
//!
//! Stores acquisition, recording and inference settings in a JSON file at
//! `<data_dir>/neurolog/config.json`. Missing fields take their defaults.

use neurolog_core::inference::InferenceConfig;
use neurolog_core::SourceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_udp_addr() -> String {
    format!("127.0.0.1:{}", neurolog_core::DEFAULT_UDP_PORT)
}

fn default_channel_count() -> usize {
    neurolog_core::DEFAULT_CHANNEL_COUNT
}

fn default_sample_rate() -> u32 {
    neurolog_core::DEFAULT_SAMPLE_RATE
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8920
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("neurolog")
}

fn default_recordings_dir() -> PathBuf {
    data_root().join("recordings")
}

fn default_patients_file() -> PathBuf {
    data_root().join("patients.json")
}

/// Persistent application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// UDP endpoint the acquisition stream arrives on
    #[serde(default = "default_udp_addr")]
    pub udp_addr: String,
    #[serde(default = "default_channel_count")]
    pub channel_count: usize,
    /// Nominal sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Use the synthetic generator instead of the network
    #[serde(default)]
    pub simulate: bool,
    /// Band-pass conditioning of network samples
    #[serde(default = "default_true")]
    pub filter_enabled: bool,
    /// HTTP port of the status/control server
    #[serde(default = "default_port")]
    pub server_port: u16,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,
    #[serde(default = "default_patients_file")]
    pub patients_file: PathBuf,
    /// Classifier model; inference stays off without one
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub inference: InferenceConfig,
    /// UDP consumer for intent commands and marker triggers, e.g. `127.0.0.1:5005`
    #[serde(default)]
    pub intent_forward_addr: Option<String>,
    /// Daily rolling log files go here when set
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            udp_addr: default_udp_addr(),
            channel_count: default_channel_count(),
            sample_rate: default_sample_rate(),
            simulate: false,
            filter_enabled: true,
            server_port: default_port(),
            bind_addr: default_bind_addr(),
            recordings_dir: default_recordings_dir(),
            patients_file: default_patients_file(),
            model_path: None,
            inference: InferenceConfig::default(),
            intent_forward_addr: None,
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Config file path: `<data_dir>/neurolog/config.json`
    pub fn path() -> PathBuf {
        data_root().join("config.json")
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Source selection derived from this config
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            addr: self.udp_addr.clone(),
            channel_count: self.channel_count,
            sample_rate: self.sample_rate,
            simulate: self.simulate,
            filter_enabled: self.filter_enabled,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.udp_addr, "127.0.0.1:12345");
        assert_eq!(config.channel_count, 16);
        assert_eq!(config.sample_rate, 125);
        assert!(!config.simulate);
        assert!(config.filter_enabled);
        assert_eq!(config.server_port, 8920);
        assert_eq!(config.model_path, None);
        assert!(config.recordings_dir.ends_with("neurolog/recordings"));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"simulate": true, "inference": {"min_fraction": 0.5}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert!(config.simulate);
        assert_eq!(config.channel_count, 16);
        assert_eq!(config.inference.min_fraction, 0.5);
        assert_eq!(config.inference.window_size, 250);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server_port, 8920);
        assert_eq!(config.intent_forward_addr, None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = AppConfig {
            udp_addr: "0.0.0.0:9000".to_string(),
            channel_count: 8,
            model_path: Some(PathBuf::from("/models/lr.json")),
            intent_forward_addr: Some("127.0.0.1:5005".to_string()),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.udp_addr, "0.0.0.0:9000");
        assert_eq!(loaded.channel_count, 8);
        assert_eq!(loaded.model_path, Some(PathBuf::from("/models/lr.json")));
        assert_eq!(loaded.intent_forward_addr.as_deref(), Some("127.0.0.1:5005"));
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{broken").unwrap();
        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.sample_rate, 125);
    }

    #[test]
    fn test_source_config() {
        let config = AppConfig {
            simulate: true,
            channel_count: 4,
            ..Default::default()
        };
        let source = config.source_config();
        assert!(source.simulate);
        assert_eq!(source.channel_count, 4);
        assert_eq!(source.addr, "127.0.0.1:12345");
    }
}
