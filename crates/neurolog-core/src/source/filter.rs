//! Real-time band-pass conditioning for network samples
//!
//! Cascade per channel: 2nd-order Butterworth high-pass at 0.5 Hz (drift and
//! movement artefacts) followed by a 4th-order Butterworth low-pass at 45 Hz
//! (mains interference), built from biquad sections with persistent state.

use super::{DropCounter, Sample, SampleSource};

/// High-pass corner (Hz)
pub const HIGHPASS_HZ: f64 = 0.5;

/// Low-pass corner (Hz)
pub const LOWPASS_HZ: f64 = 45.0;

/// Q factors of the two sections of a 4th-order Butterworth
const BUTTERWORTH4_Q: [f64; 2] = [0.541_196_100_146_197, 1.306_562_964_876_376_6];

/// Biquad coefficients, normalised so a0 = 1
#[derive(Debug, Clone, Copy)]
struct Coeffs {
    b: [f64; 3],
    a: [f64; 2],
}

/// Transposed direct form II section
#[derive(Debug, Clone)]
struct Biquad {
    coeffs: Coeffs,
    z: [f64; 2],
}

impl Biquad {
    fn lowpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * cutoff / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        let b1 = (1.0 - cos) / a0;
        Self::new(Coeffs {
            b: [b1 / 2.0, b1, b1 / 2.0],
            a: [-2.0 * cos / a0, (1.0 - alpha) / a0],
        })
    }

    fn highpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * cutoff / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        let b0 = (1.0 + cos) / 2.0 / a0;
        Self::new(Coeffs {
            b: [b0, -2.0 * b0, b0],
            a: [-2.0 * cos / a0, (1.0 - alpha) / a0],
        })
    }

    fn new(coeffs: Coeffs) -> Self {
        Self { coeffs, z: [0.0; 2] }
    }

    fn process(&mut self, x: f64) -> f64 {
        let c = &self.coeffs;
        let y = c.b[0] * x + self.z[0];
        self.z[0] = c.b[1] * x - c.a[0] * y + self.z[1];
        self.z[1] = c.b[2] * x - c.a[1] * y;
        y
    }

    fn reset(&mut self) {
        self.z = [0.0; 2];
    }
}

/// Per-channel band-pass filter bank
#[derive(Debug, Clone)]
pub struct BandpassFilter {
    channels: Vec<[Biquad; 3]>,
}

impl BandpassFilter {
    /// Build a bank for `channel_count` channels
    ///
    /// The low-pass corner is clamped below Nyquist for low sample rates.
    pub fn new(sample_rate: f64, channel_count: usize, low_hz: f64, high_hz: f64) -> Self {
        let high_hz = high_hz.min(sample_rate * 0.45);
        let chain = [
            Biquad::highpass(sample_rate, low_hz, std::f64::consts::FRAC_1_SQRT_2),
            Biquad::lowpass(sample_rate, high_hz, BUTTERWORTH4_Q[0]),
            Biquad::lowpass(sample_rate, high_hz, BUTTERWORTH4_Q[1]),
        ];
        Self {
            channels: vec![chain; channel_count],
        }
    }

    /// 0.5–45 Hz bank used for EEG
    pub fn eeg_default(sample_rate: f64, channel_count: usize) -> Self {
        Self::new(sample_rate, channel_count, HIGHPASS_HZ, LOWPASS_HZ)
    }

    /// Filter one multi-channel sample in place
    ///
    /// Extra channels beyond the bank size pass through untouched.
    pub fn process(&mut self, values: &mut [f64]) {
        for (value, chain) in values.iter_mut().zip(self.channels.iter_mut()) {
            let mut y = *value;
            for section in chain.iter_mut() {
                y = section.process(y);
            }
            *value = y;
        }
    }

    /// Clear all section state
    pub fn reset(&mut self) {
        for chain in &mut self.channels {
            for section in chain.iter_mut() {
                section.reset();
            }
        }
    }
}

/// Source decorator applying a [`BandpassFilter`] to every sample
pub struct FilteredSource<S> {
    inner: S,
    filter: BandpassFilter,
}

impl<S: SampleSource> FilteredSource<S> {
    pub fn new(inner: S, filter: BandpassFilter) -> Self {
        Self { inner, filter }
    }
}

impl<S: SampleSource> SampleSource for FilteredSource<S> {
    fn produce(&mut self) -> Option<Sample> {
        let sample = self.inner.produce()?;
        let mut channels = sample.channels().to_vec();
        self.filter.process(&mut channels);
        Some(Sample::with_timestamp(
            channels,
            sample.timestamp(),
            sample.is_simulated(),
        ))
    }

    fn is_simulated(&self) -> bool {
        self.inner.is_simulated()
    }

    fn channel_count(&self) -> usize {
        self.inner.channel_count()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn drop_counter(&self) -> DropCounter {
        self.inner.drop_counter()
    }
}
