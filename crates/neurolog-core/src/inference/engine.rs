//! Inference engine
//!
//! Buffers the raw channel stream, classifies the window every `stride`
//! samples once it is full, and smooths the results with two gates:
//!
//! 1. the latest window must be confident enough (`min_confidence`)
//! 2. its label must make up at least `min_fraction` of the recent history
//!
//! State moves Idle → Buffering → Ready purely on sample count.

use super::classifier::{ClassLabel, Classifier};
use super::history::{PredictionHistory, PredictionResult};
use super::window::ClassificationWindow;
use super::{InferenceConfig, InferenceError};
use serde::Serialize;

/// Float slack for the fraction gate (7 of 10 must pass a 0.7 threshold)
const FRACTION_EPSILON: f64 = 1e-9;

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No samples yet
    Idle,
    /// Window not yet full
    Buffering,
    /// Classifying every stride
    Ready,
}

/// Sliding-window classifier with consensus smoothing
pub struct InferenceEngine {
    config: InferenceConfig,
    window: ClassificationWindow,
    classifier: Option<Box<dyn Classifier>>,
    history: PredictionHistory,
    samples_seen: u64,
    last_prediction_at: Option<u64>,
}

impl InferenceEngine {
    /// Engine without a model; samples are buffered but never classified
    pub fn new(channel_count: usize, config: InferenceConfig) -> Self {
        let config = InferenceConfig {
            window_size: config.window_size.max(1),
            stride: config.stride.max(1),
            history_len: config.history_len.max(1),
            ..config
        };
        Self {
            window: ClassificationWindow::new(config.window_size, channel_count),
            history: PredictionHistory::new(config.history_len),
            classifier: None,
            samples_seen: 0,
            last_prediction_at: None,
            config,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.set_classifier(Some(classifier));
        self
    }

    /// Install or remove the model; buffered state is kept
    pub fn set_classifier(&mut self, classifier: Option<Box<dyn Classifier>>) {
        if let Some(c) = &classifier {
            if c.channel_count() != self.window.channel_count() {
                tracing::warn!(
                    model_channels = c.channel_count(),
                    stream_channels = self.window.channel_count(),
                    "Model channel count differs from stream; extra channels ignored"
                );
            }
        }
        self.classifier = classifier;
    }

    /// True when a model is loaded
    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Push one raw channel vector
    pub fn add_sample(&mut self, channels: &[f64]) -> Result<(), InferenceError> {
        self.window.push(channels)?;
        self.samples_seen += 1;
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        if self.samples_seen == 0 {
            EngineState::Idle
        } else if !self.window.is_full() {
            EngineState::Buffering
        } else {
            EngineState::Ready
        }
    }

    /// Samples pushed since creation or the last reset
    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    fn prediction_due(&self) -> bool {
        if self.state() != EngineState::Ready {
            return false;
        }
        if self.last_prediction_at == Some(self.samples_seen) {
            return false;
        }
        let since_full = self.samples_seen - self.config.window_size as u64;
        since_full % self.config.stride as u64 == 0
    }

    /// Classify if a stride boundary was reached with a full window
    ///
    /// Repeated calls for the same sample return `None` after the first.
    pub fn maybe_predict(&mut self) -> Option<PredictionResult> {
        if !self.prediction_due() {
            return None;
        }
        let classifier = self.classifier.as_ref()?;
        self.last_prediction_at = Some(self.samples_seen);

        let distribution = classifier.classify(&self.window);
        let (label, confidence) = distribution.top()?;
        let result = PredictionResult::new(label, confidence);
        tracing::debug!(
            %label,
            confidence = result.confidence,
            sample = self.samples_seen,
            "Window classified"
        );
        self.history.push(result.clone());
        Some(result)
    }

    /// Stable label and mean confidence, or `None` for "no stable intent"
    pub fn consensus(&self) -> Option<(ClassLabel, f64)> {
        let latest = self.history.latest()?;

        if self.config.min_confidence <= 0.0 || self.config.min_fraction <= 0.0 {
            return Some((latest.label, latest.confidence));
        }

        if latest.label == ClassLabel::None || latest.confidence < self.config.min_confidence {
            return None;
        }

        let (count, mean_confidence) = self.history.label_stats(latest.label);
        let fraction = count as f64 / self.history.len() as f64;
        if fraction + FRACTION_EPSILON < self.config.min_fraction {
            return None;
        }
        Some((latest.label, mean_confidence))
    }

    pub fn history(&self) -> &PredictionHistory {
        &self.history
    }

    /// Record an externally produced prediction
    pub fn record(&mut self, result: PredictionResult) {
        self.history.push(result);
    }

    /// Forget buffered samples and predictions
    pub fn reset(&mut self) {
        self.window.clear();
        self.history.clear();
        self.samples_seen = 0;
        self.last_prediction_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::classifier::ClassDistribution;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Always answers the same label and counts invocations
    struct Fixed {
        label: ClassLabel,
        confidence: f64,
        calls: Arc<AtomicUsize>,
    }

    impl Classifier for Fixed {
        fn channel_count(&self) -> usize {
            2
        }

        fn classify(&self, _window: &ClassificationWindow) -> ClassDistribution {
            self.calls.fetch_add(1, Ordering::Relaxed);
            ClassDistribution::new(vec![(self.label, self.confidence)])
        }
    }

    fn engine_with(label: ClassLabel, confidence: f64) -> (InferenceEngine, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = InferenceEngine::new(2, InferenceConfig::default()).with_classifier(Box::new(Fixed {
            label,
            confidence,
            calls: Arc::clone(&calls),
        }));
        (engine, calls)
    }

    fn pred(label: ClassLabel, confidence: f64) -> PredictionResult {
        PredictionResult::new(label, confidence)
    }

    #[test]
    fn test_state_transitions_by_count() {
        let (mut engine, _) = engine_with(ClassLabel::Left, 0.9);
        assert_eq!(engine.state(), EngineState::Idle);
        engine.add_sample(&[0.0, 0.0]).unwrap();
        assert_eq!(engine.state(), EngineState::Buffering);
        for _ in 1..250 {
            engine.add_sample(&[0.0, 0.0]).unwrap();
        }
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[test]
    fn test_predicts_on_full_window_then_every_stride() {
        let (mut engine, calls) = engine_with(ClassLabel::Left, 0.9);
        let mut predicted_at = Vec::new();
        for i in 1..=400u64 {
            engine.add_sample(&[1.0, 2.0]).unwrap();
            if engine.maybe_predict().is_some() {
                predicted_at.push(i);
            }
            // A second call for the same sample never re-classifies
            assert!(engine.maybe_predict().is_none());
        }
        assert_eq!(predicted_at, vec![250, 275, 300, 325, 350, 375, 400]);
        assert_eq!(calls.load(Ordering::Relaxed), 7);
        assert_eq!(engine.history().len(), 7);
    }

    #[test]
    fn test_no_model_never_predicts() {
        let mut engine = InferenceEngine::new(2, InferenceConfig::default());
        for _ in 0..300 {
            engine.add_sample(&[0.0, 0.0]).unwrap();
            assert!(engine.maybe_predict().is_none());
        }
        assert!(engine.consensus().is_none());
    }

    #[test]
    fn test_consensus_requires_both_gates() {
        let mut engine = InferenceEngine::new(2, InferenceConfig::default());
        for _ in 0..7 {
            engine.record(pred(ClassLabel::Left, 0.8));
        }
        for _ in 0..3 {
            engine.record(pred(ClassLabel::Right, 0.9));
        }
        // Latest is Right at 0.9 but only 3/10 agree
        assert_eq!(engine.consensus(), None);

        engine.record(pred(ClassLabel::Left, 0.7));
        // 7/10 Left, latest confident
        let (label, conf) = engine.consensus().unwrap();
        assert_eq!(label, ClassLabel::Left);
        assert_relative_eq!(conf, (6.0 * 0.8 + 0.7) / 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_low_latest_confidence_blocks() {
        let mut engine = InferenceEngine::new(2, InferenceConfig::default());
        for _ in 0..9 {
            engine.record(pred(ClassLabel::Right, 0.95));
        }
        engine.record(pred(ClassLabel::Right, 0.5));
        assert_eq!(engine.consensus(), None);
    }

    #[test]
    fn test_none_label_never_an_intent() {
        let mut engine = InferenceEngine::new(2, InferenceConfig::default());
        for _ in 0..10 {
            engine.record(pred(ClassLabel::None, 0.99));
        }
        assert_eq!(engine.consensus(), None);
    }

    #[test]
    fn test_zero_thresholds_return_latest() {
        let config = InferenceConfig {
            min_confidence: 0.0,
            ..Default::default()
        };
        let mut engine = InferenceEngine::new(2, config);
        engine.record(pred(ClassLabel::Left, 0.9));
        engine.record(pred(ClassLabel::Right, 0.3));
        assert_eq!(engine.consensus(), Some((ClassLabel::Right, 0.3)));

        let config = InferenceConfig {
            min_fraction: 0.0,
            ..Default::default()
        };
        let mut engine = InferenceEngine::new(2, config);
        engine.record(pred(ClassLabel::None, 0.2));
        assert_eq!(engine.consensus(), Some((ClassLabel::None, 0.2)));
    }

    #[test]
    fn test_wrong_arity_not_counted() {
        let mut engine = InferenceEngine::new(2, InferenceConfig::default());
        assert!(engine.add_sample(&[1.0]).is_err());
        assert_eq!(engine.samples_seen(), 0);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_reset() {
        let (mut engine, _) = engine_with(ClassLabel::Left, 0.9);
        for _ in 0..250 {
            engine.add_sample(&[0.0, 0.0]).unwrap();
        }
        engine.maybe_predict().unwrap();
        engine.reset();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.history().is_empty());
    }
}
