//! Sample sources
//!
//! A source produces an effectively infinite sequence of [`Sample`]s at the
//! board's nominal rate. Two variants exist:
//! - [`network::UdpSource`]: one datagram decodes to one sample
//! - [`simulated::SimulatedSource`]: Gaussian noise paced at the nominal rate
//!
//! [`open_source`] picks the variant at startup. If the socket cannot be bound
//! within the configured timeout the simulated variant is used instead, so
//! consumers only ever see a sample stream and a `simulated` flag.

pub mod filter;
pub mod network;
pub mod simulated;

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use filter::{BandpassFilter, FilteredSource};
use network::UdpSource;
use simulated::SimulatedSource;

/// Errors raised while opening a source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out binding UDP socket on {0}")]
    BindTimeout(String),

    #[error("Socket configuration failed: {0}")]
    Socket(#[from] std::io::Error),
}

/// One timestamped vector of per-channel readings (microvolts)
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    channels: Vec<f64>,
    timestamp: DateTime<Utc>,
    simulated: bool,
}

impl Sample {
    /// Create a sample stamped with the current time
    pub fn new(channels: Vec<f64>, simulated: bool) -> Self {
        Self::with_timestamp(channels, Utc::now(), simulated)
    }

    pub fn with_timestamp(channels: Vec<f64>, timestamp: DateTime<Utc>, simulated: bool) -> Self {
        Self {
            channels,
            timestamp,
            simulated,
        }
    }

    /// Channel readings in fixed column order
    pub fn channels(&self) -> &[f64] {
        &self.channels
    }

    /// Arrival time
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// True when produced by the simulated generator
    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Shared counter of datagrams dropped as malformed
#[derive(Debug, Clone, Default)]
pub struct DropCounter(Arc<AtomicU64>);

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Producer of the sample stream
///
/// Implementations block for at most a short poll interval so the dispatch
/// worker can observe its stop flag between samples.
pub trait SampleSource: Send {
    /// Next sample, or `None` if nothing arrived within the poll interval
    fn produce(&mut self) -> Option<Sample>;

    /// True for the synthetic generator
    fn is_simulated(&self) -> bool;

    /// Channels per produced sample
    fn channel_count(&self) -> usize;

    /// Nominal rate in Hz
    fn sample_rate(&self) -> u32;

    /// Counter of malformed packets skipped by this source
    fn drop_counter(&self) -> DropCounter {
        DropCounter::default()
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn produce(&mut self) -> Option<Sample> {
        (**self).produce()
    }

    fn is_simulated(&self) -> bool {
        (**self).is_simulated()
    }

    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn drop_counter(&self) -> DropCounter {
        (**self).drop_counter()
    }
}

/// Source selection parameters
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// UDP endpoint to bind, e.g. `127.0.0.1:12345`
    pub addr: String,
    pub channel_count: usize,
    pub sample_rate: u32,
    /// Skip the network variant entirely
    pub simulate: bool,
    /// Maximum time allowed for binding before falling back
    pub bind_timeout: Duration,
    /// Band-pass conditioning for network samples
    pub filter_enabled: bool,
    /// Fixed seed for the simulated generator
    pub seed: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            addr: format!("127.0.0.1:{}", crate::DEFAULT_UDP_PORT),
            channel_count: crate::DEFAULT_CHANNEL_COUNT,
            sample_rate: crate::DEFAULT_SAMPLE_RATE,
            simulate: false,
            bind_timeout: Duration::from_secs(2),
            filter_enabled: true,
            seed: None,
        }
    }
}

/// Open the network source, falling back to simulation on any bind failure
pub fn open_source(config: &SourceConfig) -> Box<dyn SampleSource> {
    if config.simulate {
        tracing::info!("Simulation requested, network source skipped");
        return Box::new(simulated_from(config));
    }

    match UdpSource::bind_with_timeout(
        &config.addr,
        config.channel_count,
        config.sample_rate,
        config.bind_timeout,
    ) {
        Ok(udp) => {
            tracing::info!(addr = %config.addr, "Network source ready");
            if config.filter_enabled {
                let filter = BandpassFilter::eeg_default(
                    f64::from(config.sample_rate),
                    config.channel_count,
                );
                Box::new(FilteredSource::new(udp, filter))
            } else {
                Box::new(udp)
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Network source unavailable, falling back to simulation");
            Box::new(simulated_from(config))
        }
    }
}

fn simulated_from(config: &SourceConfig) -> SimulatedSource {
    let source = SimulatedSource::new(config.channel_count, config.sample_rate);
    match config.seed {
        Some(seed) => source.with_seed(seed),
        None => source,
    }
}
