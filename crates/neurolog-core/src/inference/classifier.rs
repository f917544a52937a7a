//! Window classifiers
//!
//! A [`Classifier`] reduces a full [`ClassificationWindow`] to a probability
//! distribution over [`ClassLabel`]. [`LogVarianceModel`] is the shipped
//! implementation: per-channel log-variance features, z-scored with the
//! training statistics, fed through a linear layer and a softmax.
//!
//! ## Model file
//!
//! ```json
//! {
//!   "labels": ["left", "right", "none"],
//!   "channels": 16,
//!   "feature_mean": [ ... 16 values ... ],
//!   "feature_std":  [ ... 16 values ... ],
//!   "weights": [[ ... 16 ... ], [ ... ], [ ... ]],
//!   "bias": [0.0, 0.0, 0.0]
//! }
//! ```
//!
//! `feature_mean` and `feature_std` are optional (identity scaling).

use super::window::ClassificationWindow;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Variance floor before the logarithm
const VARIANCE_EPSILON: f64 = 1e-10;

/// Motor-intent classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassLabel {
    Left,
    Right,
    None,
}

impl ClassLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassLabel::Left => "left",
            ClassLabel::Right => "right",
            ClassLabel::None => "none",
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability per label, in model output order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDistribution {
    entries: Vec<(ClassLabel, f64)>,
}

impl ClassDistribution {
    pub fn new(entries: Vec<(ClassLabel, f64)>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[(ClassLabel, f64)] {
        &self.entries
    }

    pub fn probability(&self, label: ClassLabel) -> Option<f64> {
        self.entries
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, p)| *p)
    }

    /// Most probable label; ties go to the earlier entry
    pub fn top(&self) -> Option<(ClassLabel, f64)> {
        self.entries.iter().copied().fold(None, |best, (label, p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((label, p)),
        })
    }
}

/// Window-to-distribution reduction
pub trait Classifier: Send {
    /// Channels the classifier was built for
    fn channel_count(&self) -> usize;

    /// Classify a full window
    fn classify(&self, window: &ClassificationWindow) -> ClassDistribution;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }

    fn classify(&self, window: &ClassificationWindow) -> ClassDistribution {
        (**self).classify(window)
    }
}

/// Errors loading a model file
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to read model {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("inconsistent model: {0}")]
    Invalid(String),
}

/// Linear model over z-scored log-variance features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogVarianceModel {
    pub labels: Vec<ClassLabel>,
    pub channels: usize,
    #[serde(default)]
    pub feature_mean: Option<Vec<f64>>,
    #[serde(default)]
    pub feature_std: Option<Vec<f64>>,
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl LogVarianceModel {
    /// Load and validate a JSON model file
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = Self::from_json(&text)?;
        tracing::info!(
            path = %path.display(),
            labels = model.labels.len(),
            channels = model.channels,
            "Classifier model loaded"
        );
        Ok(model)
    }

    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        let model: Self = serde_json::from_str(text)?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let invalid = |msg: String| Err(ModelError::Invalid(msg));
        if self.labels.is_empty() {
            return invalid("no labels".into());
        }
        if self.channels == 0 {
            return invalid("zero channels".into());
        }
        if self.weights.len() != self.labels.len() || self.bias.len() != self.labels.len() {
            return invalid(format!(
                "{} labels but {} weight rows and {} biases",
                self.labels.len(),
                self.weights.len(),
                self.bias.len()
            ));
        }
        if let Some(row) = self.weights.iter().find(|r| r.len() != self.channels) {
            return invalid(format!("weight row has {} entries, expected {}", row.len(), self.channels));
        }
        for (name, stats) in [("feature_mean", &self.feature_mean), ("feature_std", &self.feature_std)] {
            if stats.as_ref().is_some_and(|s| s.len() != self.channels) {
                return invalid(format!("{name} length differs from channel count"));
            }
        }
        if self
            .feature_std
            .as_ref()
            .is_some_and(|s| s.iter().any(|v| v.is_nan() || *v <= 0.0))
        {
            return invalid("feature_std must be positive".into());
        }
        Ok(())
    }

    /// z-scored log-variance per channel
    pub fn features(&self, window: &ClassificationWindow) -> Vec<f64> {
        window
            .channel_series()
            .iter()
            .take(self.channels)
            .enumerate()
            .map(|(ch, series)| {
                let n = series.len().max(1) as f64;
                let mean = series.iter().sum::<f64>() / n;
                let var = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let f = (var + VARIANCE_EPSILON).ln();
                let mu = self.feature_mean.as_ref().map_or(0.0, |m| m[ch]);
                let sd = self.feature_std.as_ref().map_or(1.0, |s| s[ch]);
                (f - mu) / sd
            })
            .collect()
    }
}

impl Classifier for LogVarianceModel {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn classify(&self, window: &ClassificationWindow) -> ClassDistribution {
        let features = self.features(window);
        let scores: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(&features).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect();
        let probabilities = softmax(&scores);
        ClassDistribution::new(self.labels.iter().copied().zip(probabilities).collect())
    }
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
