//! Synthetic EEG generator
//!
//! Produces `N(0, 1) * 50 + 20 * sin(2π · 0.5 · t)` µV on every channel, paced
//! at the nominal rate against a deadline clock so timing error does not
//! accumulate.

use super::{Sample, SampleSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

/// Noise amplitude (µV)
const NOISE_AMPLITUDE: f64 = 50.0;

/// Slow drift amplitude (µV)
const DRIFT_AMPLITUDE: f64 = 20.0;

/// Slow drift frequency (Hz)
const DRIFT_FREQUENCY: f64 = 0.5;

/// If the consumer falls this far behind, the pacing clock is re-anchored
const MAX_LAG: Duration = Duration::from_secs(1);

/// Gaussian-noise sample generator
pub struct SimulatedSource {
    channel_count: usize,
    sample_rate: u32,
    period: Duration,
    rng: StdRng,
    next_deadline: Option<Instant>,
    paced: bool,
    produced: u64,
}

impl SimulatedSource {
    pub fn new(channel_count: usize, sample_rate: u32) -> Self {
        Self {
            channel_count,
            sample_rate,
            period: Duration::from_secs_f64(1.0 / f64::from(sample_rate.max(1))),
            rng: StdRng::from_entropy(),
            next_deadline: None,
            paced: true,
            produced: 0,
        }
    }

    /// Use a fixed seed for reproducible output
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Produce as fast as the caller asks (offline tools, tests)
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Samples produced so far
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn wait_for_slot(&mut self) {
        let now = Instant::now();
        let deadline = match self.next_deadline {
            Some(d) if now.saturating_duration_since(d) < MAX_LAG => d,
            _ => now,
        };
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline + self.period);
    }

    /// Standard normal variate (Box-Muller)
    fn gaussian(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

impl SampleSource for SimulatedSource {
    fn produce(&mut self) -> Option<Sample> {
        if self.paced {
            self.wait_for_slot();
        }

        let t = self.produced as f64 / f64::from(self.sample_rate.max(1));
        let drift = DRIFT_AMPLITUDE * (2.0 * std::f64::consts::PI * DRIFT_FREQUENCY * t).sin();
        let channels = (0..self.channel_count)
            .map(|_| self.gaussian() * NOISE_AMPLITUDE + drift)
            .collect();

        self.produced += 1;
        Some(Sample::new(channels, true))
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_produces_requested_channels() {
        let mut source = SimulatedSource::new(16, 125).with_seed(3).unpaced();
        let sample = source.produce().unwrap();
        assert_eq!(sample.channel_count(), 16);
        assert!(sample.is_simulated());
        assert!(sample.channels().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_seeded_output_is_reproducible() {
        let mut a = SimulatedSource::new(4, 125).with_seed(42).unpaced();
        let mut b = SimulatedSource::new(4, 125).with_seed(42).unpaced();
        for _ in 0..10 {
            assert_eq!(
                a.produce().unwrap().channels(),
                b.produce().unwrap().channels()
            );
        }
    }

    #[test]
    fn test_noise_statistics() {
        let mut source = SimulatedSource::new(1, 125).with_seed(9).unpaced();
        // Whole drift periods (2 s each) so the sine averages out
        let n = 125 * 2 * 40;
        let values: Vec<f64> = (0..n).map(|_| source.produce().unwrap().channels()[0]).collect();
        let mean = values.iter().sum::<f64>() / n as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 3.0, "mean {mean}");
        // 50² noise + 20²/2 drift
        let expected = NOISE_AMPLITUDE.powi(2) + DRIFT_AMPLITUDE.powi(2) / 2.0;
        assert!((var - expected).abs() / expected < 0.1, "variance {var}");
    }

    #[test]
    fn test_paced_rate() {
        let mut source = SimulatedSource::new(2, 250).with_seed(1);
        let start = Instant::now();
        for _ in 0..50 {
            source.produce();
        }
        // 49 periods of 4 ms after the first sample
        assert!(start.elapsed() >= Duration::from_millis(190));
        assert_eq!(source.produced(), 50);
    }
}
