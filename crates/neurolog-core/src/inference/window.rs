//! Classification window
//!
//! Fixed-capacity ring of the most recent `W` samples, stored interleaved
//! (`W * channels` values). Pushing never allocates and never blocks: once
//! full, the oldest sample is overwritten.

use super::InferenceError;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

pub struct ClassificationWindow {
    ring: HeapRb<f64>,
    channel_count: usize,
    window_size: usize,
}

impl ClassificationWindow {
    pub fn new(window_size: usize, channel_count: usize) -> Self {
        let window_size = window_size.max(1);
        let channel_count = channel_count.max(1);
        Self {
            ring: HeapRb::new(window_size * channel_count),
            channel_count,
            window_size,
        }
    }

    /// Append one sample, overwriting the oldest when full
    pub fn push(&mut self, channels: &[f64]) -> Result<(), InferenceError> {
        if channels.len() != self.channel_count {
            return Err(InferenceError::ChannelMismatch {
                expected: self.channel_count,
                got: channels.len(),
            });
        }
        self.ring.push_slice_overwrite(channels);
        Ok(())
    }

    /// Samples currently held
    pub fn len(&self) -> usize {
        self.ring.occupied_len() / self.channel_count
    }

    pub fn is_empty(&self) -> bool {
        self.ring.occupied_len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.window_size
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Copy out channel-major series, oldest sample first
    pub fn channel_series(&self) -> Vec<Vec<f64>> {
        let mut series = vec![Vec::with_capacity(self.len()); self.channel_count];
        for (i, value) in self.ring.iter().enumerate() {
            series[i % self.channel_count].push(*value);
        }
        series
    }

    /// Drop all buffered samples
    pub fn clear(&mut self) {
        Consumer::clear(&mut self.ring);
    }
}
