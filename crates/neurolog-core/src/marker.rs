//! Marker state machine
//!
//! Decides which annotation (if any) is attached to each dispatched sample:
//! - manual markers (`T1`, `T2`) requested by the operator for the next sample
//! - an automatic `T0` exactly [`AUTO_RESET_DELAY_SAMPLES`] samples after the
//!   most recent manual marker
//! - a timed exclusive baseline period that emits `BASELINE` once and rejects
//!   manual markers until its deadline passes
//!
//! [`MarkerState::consume_annotation_for_next_sample`] must be called exactly
//! once per sample, in dispatch order.
//!
//! [`AUTO_RESET_DELAY_SAMPLES`]: crate::AUTO_RESET_DELAY_SAMPLES

use crate::recording::session::Task;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default exclusive baseline length (5 minutes)
pub const DEFAULT_EXCLUSIVE_DURATION: Duration = Duration::from_secs(300);

/// Annotation codes written to the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Marker {
    /// Manual event A (`T1`, real movement / left)
    #[serde(rename = "T1")]
    ManualA,
    /// Manual event B (`T2`, imagined movement / right)
    #[serde(rename = "T2")]
    ManualB,
    /// Automatic end-of-response marker (`T0`)
    #[serde(rename = "T0")]
    AutoReset,
    /// Start of an exclusive baseline period
    #[serde(rename = "BASELINE")]
    Baseline,
}

impl Marker {
    /// Code written in the `Annotations` column
    pub fn code(self) -> &'static str {
        match self {
            Marker::ManualA => "T1",
            Marker::ManualB => "T2",
            Marker::AutoReset => "T0",
            Marker::Baseline => "BASELINE",
        }
    }

    /// Operator-triggered markers
    pub fn is_manual(self) -> bool {
        matches!(self, Marker::ManualA | Marker::ManualB)
    }

    /// Markers that schedule an automatic `T0`
    pub fn triggers_delay(self) -> bool {
        self.is_manual()
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Stimulus cue sent downstream when a manual marker is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerTrigger {
    Left,
    Right,
}

impl MarkerTrigger {
    /// `T1` cues left and `T2` cues right, in tasks that forward triggers
    pub fn for_marker(marker: Marker, task: Task) -> Option<Self> {
        if !task.forwards_triggers() {
            return None;
        }
        match marker {
            Marker::ManualA => Some(MarkerTrigger::Left),
            Marker::ManualB => Some(MarkerTrigger::Right),
            Marker::AutoReset | Marker::Baseline => None,
        }
    }

    pub fn wire(self) -> &'static str {
        match self {
            MarkerTrigger::Left => "trigger_left",
            MarkerTrigger::Right => "trigger_right",
        }
    }
}

impl fmt::Display for MarkerTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire())
    }
}

/// Unknown marker code
#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown marker code: {0:?}")]
pub struct UnknownMarker(pub String);

impl FromStr for Marker {
    type Err = UnknownMarker;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "T1" => Ok(Marker::ManualA),
            "T2" => Ok(Marker::ManualB),
            "T0" => Ok(Marker::AutoReset),
            "BASELINE" => Ok(Marker::Baseline),
            other => Err(UnknownMarker(other.to_string())),
        }
    }
}

/// Named rejections; the state is left untouched when one is returned
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkerRejection {
    #[error("exclusive mode active, manual markers blocked")]
    ExclusiveModeActive { remaining_secs: Option<u64> },

    #[error("{0} cannot be requested manually")]
    NotManual(Marker),

    #[error("exclusive duration out of range: {0:?}")]
    InvalidDuration(Duration),
}

impl MarkerRejection {
    /// Stable machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            MarkerRejection::ExclusiveModeActive { .. } => "exclusive_mode_active",
            MarkerRejection::NotManual(_) => "not_manual",
            MarkerRejection::InvalidDuration(_) => "invalid_duration",
        }
    }
}

/// How long an exclusive period lasts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExclusiveDuration {
    /// Wall-clock duration
    Wall(Duration),
    /// Number of dispatched samples
    Samples(u64),
}

impl ExclusiveDuration {
    pub fn seconds(secs: u64) -> Self {
        ExclusiveDuration::Wall(Duration::from_secs(secs))
    }
}

#[derive(Debug, Clone, Copy)]
enum Deadline {
    At(Instant),
    AfterSamples { limit: u64, elapsed: u64 },
}

impl Deadline {
    fn has_elapsed(&self, now: Instant) -> bool {
        match *self {
            Deadline::At(at) => now >= at,
            Deadline::AfterSamples { limit, elapsed } => elapsed >= limit,
        }
    }

    fn remaining_secs(&self, now: Instant, sample_rate: u32) -> u64 {
        match *self {
            Deadline::At(at) => {
                let left = at.saturating_duration_since(now);
                left.as_secs() + u64::from(left.subsec_nanos() > 0)
            }
            Deadline::AfterSamples { limit, elapsed } => {
                limit.saturating_sub(elapsed).div_ceil(u64::from(sample_rate.max(1)))
            }
        }
    }
}

/// Read-only view of the marker state, taken atomically
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerSnapshot {
    pub last_marker: Option<Marker>,
    pub samples_since_marker: u64,
    pub pending: Option<Marker>,
    pub exclusive_mode_active: bool,
    pub exclusive_mode_remaining_secs: Option<u64>,
}

/// Per-session annotation state
#[derive(Debug, Clone)]
pub struct MarkerState {
    last_marker: Option<Marker>,
    samples_since_marker: u64,
    pending: Option<Marker>,
    exclusive: Option<Deadline>,
    delay_threshold: u64,
    sample_rate: u32,
}

impl MarkerState {
    /// State with the standard 400-sample delay at the given rate
    pub fn new(sample_rate: u32) -> Self {
        Self::with_delay(crate::AUTO_RESET_DELAY_SAMPLES, sample_rate)
    }

    pub fn with_delay(delay_threshold: u64, sample_rate: u32) -> Self {
        Self {
            last_marker: None,
            samples_since_marker: 0,
            pending: None,
            exclusive: None,
            delay_threshold: delay_threshold.max(1),
            sample_rate,
        }
    }

    /// Request a manual marker for the next sample
    ///
    /// A later request before the next sample replaces an earlier one.
    pub fn set_pending_marker(&mut self, marker: Marker) -> Result<(), MarkerRejection> {
        if !marker.is_manual() {
            return Err(MarkerRejection::NotManual(marker));
        }
        let now = Instant::now();
        self.expire_exclusive(now);
        if let Some(deadline) = &self.exclusive {
            let remaining_secs = Some(deadline.remaining_secs(now, self.sample_rate));
            tracing::debug!(%marker, ?remaining_secs, "Manual marker blocked by exclusive mode");
            return Err(MarkerRejection::ExclusiveModeActive { remaining_secs });
        }
        self.pending = Some(marker);
        Ok(())
    }

    /// Enter exclusive mode; the next sample carries `BASELINE`
    pub fn start_exclusive_mode(&mut self, duration: ExclusiveDuration) -> Result<(), MarkerRejection> {
        let now = Instant::now();
        self.expire_exclusive(now);
        if let Some(deadline) = &self.exclusive {
            return Err(MarkerRejection::ExclusiveModeActive {
                remaining_secs: Some(deadline.remaining_secs(now, self.sample_rate)),
            });
        }
        self.exclusive = Some(match duration {
            ExclusiveDuration::Wall(d) => {
                Deadline::At(now.checked_add(d).ok_or(MarkerRejection::InvalidDuration(d))?)
            }
            ExclusiveDuration::Samples(limit) => Deadline::AfterSamples { limit, elapsed: 0 },
        });
        self.pending = Some(Marker::Baseline);
        tracing::info!(?duration, "Exclusive baseline mode started");
        Ok(())
    }

    /// Resolve the annotation of the next sample and advance the state
    pub fn consume_annotation_for_next_sample(&mut self) -> Option<Marker> {
        self.expire_exclusive(Instant::now());

        let resolved = if let Some(marker) = self.pending.take() {
            self.last_marker = Some(marker);
            self.samples_since_marker = 0;
            Some(marker)
        } else if self.last_marker.is_some_and(Marker::triggers_delay) {
            self.samples_since_marker += 1;
            if self.samples_since_marker >= self.delay_threshold {
                self.last_marker = Some(Marker::AutoReset);
                self.samples_since_marker = 0;
                Some(Marker::AutoReset)
            } else {
                None
            }
        } else {
            None
        };

        if let Some(Deadline::AfterSamples { elapsed, .. }) = &mut self.exclusive {
            *elapsed += 1;
        }

        resolved
    }

    fn expire_exclusive(&mut self, now: Instant) {
        if self.exclusive.is_some_and(|d| d.has_elapsed(now)) {
            self.exclusive = None;
            tracing::info!("Exclusive baseline mode finished");
        }
    }

    /// True while manual markers are blocked
    pub fn is_exclusive_active(&self) -> bool {
        self.exclusive
            .is_some_and(|d| !d.has_elapsed(Instant::now()))
    }

    /// Whole seconds left in exclusive mode, rounded up
    pub fn exclusive_remaining_secs(&self) -> Option<u64> {
        let now = Instant::now();
        self.exclusive
            .filter(|d| !d.has_elapsed(now))
            .map(|d| d.remaining_secs(now, self.sample_rate))
    }

    pub fn last_marker(&self) -> Option<Marker> {
        self.last_marker
    }

    pub fn samples_since_marker(&self) -> u64 {
        self.samples_since_marker
    }

    pub fn delay_threshold(&self) -> u64 {
        self.delay_threshold
    }

    pub fn snapshot(&self) -> MarkerSnapshot {
        let remaining = self.exclusive_remaining_secs();
        MarkerSnapshot {
            last_marker: self.last_marker,
            samples_since_marker: self.samples_since_marker,
            pending: self.pending,
            exclusive_mode_active: remaining.is_some(),
            exclusive_mode_remaining_secs: remaining,
        }
    }

    /// Start counting for a new recording session
    ///
    /// Drops the delay counter and any pending manual marker. A running
    /// exclusive period and its pending `BASELINE` carry over.
    pub fn start_session(&mut self) {
        self.last_marker = None;
        self.samples_since_marker = 0;
        if self.pending.is_some_and(Marker::is_manual) {
            self.pending = None;
        }
    }
}

impl Default for MarkerState {
    fn default() -> Self {
        Self::new(crate::DEFAULT_SAMPLE_RATE)
    }
}
