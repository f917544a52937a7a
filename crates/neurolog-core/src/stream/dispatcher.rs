//! Per-sample fan-out
//!
//! For every sample, in this order:
//! 1. resolve its annotation from the marker state
//! 2. offer it to display subscribers (never blocks; full queues drop)
//! 3. append it to the open recording session, if any
//! 4. feed the raw channels to the inference engine, if active
//!
//! Steps 1, 3 and 4 run synchronously on the dispatch worker so the
//! marker-to-sample binding and the delay counter see samples strictly in
//! order. Control and status calls from other threads go through the same
//! locks, so they observe either the state before a sample or after it.

use super::lock;
use super::status::PipelineStatus;
use crate::inference::classifier::Classifier;
use crate::inference::engine::InferenceEngine;
use crate::inference::intent::IntentCommand;
use crate::inference::InferenceConfig;
use crate::marker::{
    ExclusiveDuration, Marker, MarkerRejection, MarkerSnapshot, MarkerState, MarkerTrigger,
};
use crate::recording::logger::{LoggerError, SessionLogger, SessionSummary};
use crate::recording::session::RecordingSession;
use crate::source::{DropCounter, Sample};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sentinel for "no sample yet" in the last-arrival clock
const NEVER: u64 = u64::MAX;

/// A dispatched sample as seen by display consumers
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySample {
    /// Dispatch sequence number since the pipeline started
    pub sequence: u64,
    pub sample: Sample,
    pub marker: Option<Marker>,
}

/// Bounded, non-blocking broadcast to any number of subscribers
struct Fanout<T> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Fanout<T> {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self, capacity: usize) -> Receiver<T> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Offer `item` to every subscriber; returns how many were full
    fn publish(&self, item: &T) -> u64 {
        let mut subscribers = lock(&self.subscribers);
        let mut full = 0;
        subscribers.retain(|tx| match tx.try_send(item.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                full += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        full
    }

    fn has_subscribers(&self) -> bool {
        !lock(&self.subscribers).is_empty()
    }
}

/// Shared per-pipeline state and the per-sample dispatch step
pub struct Dispatcher {
    markers: Mutex<MarkerState>,
    logger: SessionLogger,
    inference: Mutex<InferenceEngine>,
    inference_enabled: AtomicBool,
    latest_intent: Mutex<Option<IntentCommand>>,
    display: Fanout<DisplaySample>,
    intents: Fanout<IntentCommand>,
    triggers: Fanout<MarkerTrigger>,
    display_capacity: usize,
    simulated: bool,
    packets_dropped: DropCounter,
    samples_dispatched: AtomicU64,
    display_dropped: AtomicU64,
    dispatch_failures: AtomicU64,
    clock: Instant,
    last_sample_ms: AtomicU64,
    connection_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        channel_count: usize,
        sample_rate: u32,
        simulated: bool,
        packets_dropped: DropCounter,
    ) -> Self {
        Self::with_options(
            channel_count,
            sample_rate,
            simulated,
            packets_dropped,
            InferenceConfig::default(),
            super::DEFAULT_DISPLAY_CAPACITY,
            super::CONNECTION_TIMEOUT,
        )
    }

    pub(crate) fn with_options(
        channel_count: usize,
        sample_rate: u32,
        simulated: bool,
        packets_dropped: DropCounter,
        inference: InferenceConfig,
        display_capacity: usize,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            markers: Mutex::new(MarkerState::new(sample_rate)),
            logger: SessionLogger::new(channel_count, sample_rate),
            inference: Mutex::new(InferenceEngine::new(channel_count, inference)),
            inference_enabled: AtomicBool::new(false),
            latest_intent: Mutex::new(None),
            display: Fanout::new(),
            intents: Fanout::new(),
            triggers: Fanout::new(),
            display_capacity,
            simulated,
            packets_dropped,
            samples_dispatched: AtomicU64::new(0),
            display_dropped: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            clock: Instant::now(),
            last_sample_ms: AtomicU64::new(NEVER),
            connection_timeout,
        }
    }

    /// Annotate and fan out one sample
    ///
    /// Returns the resolved annotation. Logger and inference failures are
    /// logged and do not stop the sample reaching the other consumers.
    pub fn dispatch(&self, sample: Sample) -> Option<Marker> {
        let marker = lock(&self.markers).consume_annotation_for_next_sample();
        let sequence = self.samples_dispatched.fetch_add(1, Ordering::Relaxed);
        self.last_sample_ms
            .store(self.clock.elapsed().as_millis() as u64, Ordering::Relaxed);

        if let Some(m) = marker {
            tracing::debug!(marker = %m, sequence, "Marker attached");
        }

        if self.display.has_subscribers() {
            let full = self.display.publish(&DisplaySample {
                sequence,
                sample: sample.clone(),
                marker,
            });
            if full > 0 {
                self.display_dropped.fetch_add(full, Ordering::Relaxed);
            }
        }

        match self.logger.log_sample(&sample, marker) {
            Ok(_) => {}
            Err(e @ LoggerError::ChannelMismatch { .. }) => {
                tracing::warn!(error = %e, sequence, "Sample not recorded");
            }
            Err(e) => {
                tracing::error!(error = %e, "Recording aborted");
            }
        }

        if self.inference_enabled.load(Ordering::Acquire) {
            self.feed_inference(&sample);
        }

        marker
    }

    fn feed_inference(&self, sample: &Sample) {
        let command = {
            let mut engine = lock(&self.inference);
            if !engine.has_classifier() {
                return;
            }
            if let Err(e) = engine.add_sample(sample.channels()) {
                tracing::debug!(error = %e, "Sample skipped by inference");
                return;
            }
            if engine.maybe_predict().is_none() {
                return;
            }
            IntentCommand::from_consensus(engine.consensus())
        };

        let previous = lock(&self.latest_intent).replace(command);
        if previous != Some(command) {
            tracing::debug!(%command, "Intent updated");
        }
        self.intents.publish(&command);
    }

    /// Count a sample whose dispatch panicked
    pub(crate) fn record_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Queue a manual marker; while recording it may also cue the stimulus
    pub fn set_marker(&self, marker: Marker) -> Result<(), MarkerRejection> {
        lock(&self.markers).set_pending_marker(marker)?;
        let trigger = self
            .logger
            .current_session()
            .and_then(|session| MarkerTrigger::for_marker(marker, session.task));
        if let Some(trigger) = trigger {
            tracing::debug!(%trigger, "Marker trigger published");
            self.triggers.publish(&trigger);
        }
        Ok(())
    }

    pub fn start_exclusive_mode(&self, duration: ExclusiveDuration) -> Result<(), MarkerRejection> {
        lock(&self.markers).start_exclusive_mode(duration)
    }

    pub fn marker_snapshot(&self) -> MarkerSnapshot {
        lock(&self.markers).snapshot()
    }

    /// Open a session; the delay counter starts fresh with it
    ///
    /// The file is created before the markers lock is taken, so dispatch is
    /// not held up by the I/O. A running exclusive period carries over.
    pub fn start_recording(&self, session: RecordingSession) -> Result<(), LoggerError> {
        let prepared = self.logger.prepare(session)?;
        let mut markers = lock(&self.markers);
        self.logger.install(prepared)?;
        markers.start_session();
        Ok(())
    }

    pub fn stop_recording(&self) -> Result<Option<SessionSummary>, LoggerError> {
        self.logger.close()
    }

    pub fn current_session(&self) -> Option<RecordingSession> {
        self.logger.current_session()
    }

    pub fn set_classifier(&self, classifier: Option<Box<dyn Classifier>>) {
        let mut engine = lock(&self.inference);
        let loaded = classifier.is_some();
        engine.set_classifier(classifier);
        engine.reset();
        if !loaded {
            self.inference_enabled.store(false, Ordering::Release);
        }
    }

    /// Enable or disable inference; enabling without a model is refused
    ///
    /// Returns the resulting state. Enabling starts from an empty window.
    pub fn set_inference_active(&self, active: bool) -> bool {
        let mut engine = lock(&self.inference);
        let effective = active && engine.has_classifier();
        let was = self.inference_enabled.swap(effective, Ordering::AcqRel);
        if effective && !was {
            engine.reset();
            *lock(&self.latest_intent) = None;
        }
        if active && !effective {
            tracing::warn!("Inference requested but no model is loaded");
        }
        effective
    }

    pub fn inference_active(&self) -> bool {
        self.inference_enabled.load(Ordering::Acquire)
    }

    pub fn latest_intent(&self) -> Option<IntentCommand> {
        *lock(&self.latest_intent)
    }

    pub fn subscribe_display(&self) -> Receiver<DisplaySample> {
        self.display.subscribe(self.display_capacity)
    }

    pub fn subscribe_intents(&self) -> Receiver<IntentCommand> {
        self.intents.subscribe(self.display_capacity)
    }

    pub fn subscribe_triggers(&self) -> Receiver<MarkerTrigger> {
        self.triggers.subscribe(self.display_capacity)
    }

    pub fn samples_dispatched(&self) -> u64 {
        self.samples_dispatched.load(Ordering::Relaxed)
    }

    fn connected(&self) -> bool {
        if self.simulated {
            return true;
        }
        match self.last_sample_ms.load(Ordering::Relaxed) {
            NEVER => false,
            last => {
                let now = self.clock.elapsed().as_millis() as u64;
                now.saturating_sub(last) <= self.connection_timeout.as_millis() as u64
            }
        }
    }

    pub fn status(&self) -> PipelineStatus {
        let markers = self.marker_snapshot();
        PipelineStatus {
            connected: self.connected(),
            simulated: self.simulated,
            samples_dispatched: self.samples_dispatched(),
            samples_logged: self.logger.samples_logged(),
            recording: self.logger.is_open(),
            recording_path: self.logger.current_path(),
            exclusive_mode_remaining_secs: markers.exclusive_mode_remaining_secs,
            last_marker: markers.last_marker,
            packets_dropped: self.packets_dropped.get(),
            display_dropped: self.display_dropped.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            inference_active: self.inference_active(),
            last_intent: self.latest_intent(),
        }
    }
}
