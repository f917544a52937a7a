//! Bounded prediction history

use super::classifier::ClassLabel;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// One classified window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub label: ClassLabel,
    /// Probability of `label`, in [0, 1]
    pub confidence: f64,
    pub produced_at: DateTime<Utc>,
}

impl PredictionResult {
    pub fn new(label: ClassLabel, confidence: f64) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            produced_at: Utc::now(),
        }
    }
}

/// Last K predictions, oldest first
#[derive(Debug, Clone)]
pub struct PredictionHistory {
    entries: VecDeque<PredictionResult>,
    max_size: usize,
}

impl PredictionHistory {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            entries: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, result: PredictionResult) {
        if self.entries.len() >= self.max_size {
            self.entries.pop_front();
        }
        self.entries.push_back(result);
    }

    pub fn latest(&self) -> Option<&PredictionResult> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PredictionResult> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Entries with `label` and their mean confidence
    pub fn label_stats(&self, label: ClassLabel) -> (usize, f64) {
        let (count, sum) = self
            .entries
            .iter()
            .filter(|p| p.label == label)
            .fold((0usize, 0.0), |(n, s), p| (n + 1, s + p.confidence));
        let mean = if count == 0 { 0.0 } else { sum / count as f64 };
        (count, mean)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bounded_fifo() {
        let mut history = PredictionHistory::new(3);
        for conf in [0.1, 0.2, 0.3, 0.4] {
            history.push(PredictionResult::new(ClassLabel::Left, conf));
        }
        assert_eq!(history.len(), 3);
        let confs: Vec<f64> = history.iter().map(|p| p.confidence).collect();
        assert_eq!(confs, vec![0.2, 0.3, 0.4]);
        assert_relative_eq!(history.latest().unwrap().confidence, 0.4);
    }

    #[test]
    fn test_label_stats() {
        let mut history = PredictionHistory::new(10);
        history.push(PredictionResult::new(ClassLabel::Left, 0.8));
        history.push(PredictionResult::new(ClassLabel::Right, 0.9));
        history.push(PredictionResult::new(ClassLabel::Left, 0.6));
        let (n, mean) = history.label_stats(ClassLabel::Left);
        assert_eq!(n, 2);
        assert_relative_eq!(mean, 0.7, epsilon = 1e-12);
        assert_eq!(history.label_stats(ClassLabel::None), (0, 0.0));
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(PredictionResult::new(ClassLabel::Right, 1.5).confidence, 1.0);
    }
}
