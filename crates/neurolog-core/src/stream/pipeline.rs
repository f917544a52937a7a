//! Dispatch worker and control handle
//!
//! [`Pipeline::start`] moves the source onto a dedicated named thread that
//! pulls samples at the source's own pace and hands each one to the
//! [`Dispatcher`]. The returned [`PipelineHandle`] is cheap to clone; control
//! and status calls may come from any thread.
//!
//! A panic while dispatching one sample is caught at the dispatch boundary,
//! logged and counted; the worker carries on with the next sample so an open
//! recording is never lost to a single faulty consumer.

use super::dispatcher::{DisplaySample, Dispatcher};
use super::status::PipelineStatus;
use crate::inference::classifier::Classifier;
use crate::inference::intent::IntentCommand;
use crate::inference::InferenceConfig;
use crate::marker::{ExclusiveDuration, Marker, MarkerRejection, MarkerTrigger};
use crate::recording::logger::{LoggerError, SessionSummary};
use crate::recording::session::RecordingSession;
use crate::source::SampleSource;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub inference: InferenceConfig,
    /// Queue depth per display or intent subscriber
    pub display_capacity: usize,
    /// Silence after which a network source counts as disconnected
    pub connection_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inference: InferenceConfig::default(),
            display_capacity: super::DEFAULT_DISPLAY_CAPACITY,
            connection_timeout: super::CONNECTION_TIMEOUT,
        }
    }
}

pub struct Pipeline;

impl Pipeline {
    /// Spawn the dispatch worker for `source`
    pub fn start<S>(source: S, config: PipelineConfig) -> PipelineHandle
    where
        S: SampleSource + 'static,
    {
        let dispatcher = Arc::new(Dispatcher::with_options(
            source.channel_count(),
            source.sample_rate(),
            source.is_simulated(),
            source.drop_counter(),
            config.inference,
            config.display_capacity,
            config.connection_timeout,
        ));
        let stop_flag = Arc::new(AtomicBool::new(false));

        tracing::info!(
            simulated = source.is_simulated(),
            channels = source.channel_count(),
            sample_rate = source.sample_rate(),
            "Starting dispatch worker"
        );

        let worker = {
            let dispatcher = Arc::clone(&dispatcher);
            let stop_flag = Arc::clone(&stop_flag);
            std::thread::Builder::new()
                .name("sample-dispatch".into())
                .spawn(move || dispatch_loop(source, &dispatcher, &stop_flag))
                .expect("Failed to spawn dispatch thread")
        };

        PipelineHandle {
            inner: Arc::new(Inner {
                dispatcher,
                stop_flag,
                worker: Mutex::new(Some(worker)),
            }),
        }
    }
}

fn dispatch_loop<S: SampleSource>(mut source: S, dispatcher: &Dispatcher, stop_flag: &AtomicBool) {
    while !stop_flag.load(Ordering::Acquire) {
        let Some(sample) = source.produce() else {
            continue;
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            dispatcher.dispatch(sample);
        }));
        if let Err(panic_info) = result {
            dispatcher.record_failure();
            tracing::error!(
                panic = %panic_message(panic_info.as_ref()),
                "Sample dispatch PANICKED, continuing with next sample"
            );
        }
    }
    tracing::info!(
        samples = dispatcher.samples_dispatched(),
        "Dispatch worker exited"
    );
}

fn panic_message(panic_info: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Inner {
    dispatcher: Arc<Dispatcher>,
    stop_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        let worker = super::lock(&self.worker).take();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
        match self.dispatcher.stop_recording() {
            Ok(Some(summary)) => tracing::info!(
                path = %summary.session.path.display(),
                samples = summary.samples_written,
                "Recording closed on shutdown"
            ),
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "Failed to close recording on shutdown"),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Control and status surface of a running pipeline
#[derive(Clone)]
pub struct PipelineHandle {
    inner: Arc<Inner>,
}

impl PipelineHandle {
    fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Request a manual marker for the next sample
    pub fn set_marker(&self, marker: Marker) -> Result<(), MarkerRejection> {
        self.dispatcher().set_marker(marker)
    }

    pub fn start_exclusive_mode(&self, duration: ExclusiveDuration) -> Result<(), MarkerRejection> {
        self.dispatcher().start_exclusive_mode(duration)
    }

    pub fn start_recording(&self, session: RecordingSession) -> Result<(), LoggerError> {
        self.dispatcher().start_recording(session)
    }

    /// Close the open session; `Ok(None)` if nothing was recording
    pub fn stop_recording(&self) -> Result<Option<SessionSummary>, LoggerError> {
        self.dispatcher().stop_recording()
    }

    pub fn current_session(&self) -> Option<RecordingSession> {
        self.dispatcher().current_session()
    }

    /// Install (or remove) the window classifier
    pub fn set_classifier(&self, classifier: Option<Box<dyn Classifier>>) {
        self.dispatcher().set_classifier(classifier)
    }

    /// Returns the effective state; stays off without a model
    pub fn set_inference_active(&self, active: bool) -> bool {
        self.dispatcher().set_inference_active(active)
    }

    pub fn status(&self) -> PipelineStatus {
        self.dispatcher().status()
    }

    pub fn latest_intent(&self) -> Option<IntentCommand> {
        self.dispatcher().latest_intent()
    }

    /// Bounded feed of dispatched samples; a slow reader only loses samples
    pub fn subscribe_display(&self) -> Receiver<DisplaySample> {
        self.dispatcher().subscribe_display()
    }

    /// Intent command after every classification
    pub fn subscribe_intents(&self) -> Receiver<IntentCommand> {
        self.dispatcher().subscribe_intents()
    }

    /// Stimulus cues for accepted manual markers during recording
    pub fn subscribe_triggers(&self) -> Receiver<MarkerTrigger> {
        self.dispatcher().subscribe_triggers()
    }

    /// Check if the dispatch worker is still alive
    pub fn is_running(&self) -> bool {
        super::lock(&self.inner.worker)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the worker and close any open recording
    ///
    /// Further calls are no-ops.
    pub fn stop(&self) {
        self.inner.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::session::Task;
    use crate::source::simulated::SimulatedSource;
    use crate::source::Sample;
    use std::time::Instant;

    /// Finite source; yields nothing once exhausted
    struct Scripted {
        samples: std::vec::IntoIter<Sample>,
    }

    impl SampleSource for Scripted {
        fn produce(&mut self) -> Option<Sample> {
            match self.samples.next() {
                Some(s) => Some(s),
                None => {
                    std::thread::sleep(Duration::from_millis(5));
                    None
                }
            }
        }

        fn is_simulated(&self) -> bool {
            false
        }

        fn channel_count(&self) -> usize {
            1
        }

        fn sample_rate(&self) -> u32 {
            125
        }
    }

    fn wait_for(handle: &PipelineHandle, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.status().samples_dispatched < n && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_worker_drains_source() {
        let samples = (0..50).map(|i| Sample::new(vec![f64::from(i)], false)).collect::<Vec<_>>();
        let handle = Pipeline::start(
            Scripted {
                samples: samples.into_iter(),
            },
            PipelineConfig::default(),
        );
        wait_for(&handle, 50);
        assert!(handle.is_running());
        let status = handle.status();
        assert_eq!(status.samples_dispatched, 50);
        assert!(!status.simulated);
        handle.stop();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_stop_closes_recording() {
        let dir = tempfile::tempdir().unwrap();
        let source = SimulatedSource::new(2, 250).with_seed(11);
        let handle = Pipeline::start(source, PipelineConfig::default());
        let path = dir.path().join("P1_x").join("P1_test.csv");
        handle
            .start_recording(RecordingSession::new("P1", Task::Test, path.clone()))
            .unwrap();
        wait_for(&handle, 10);
        assert!(handle.status().recording);

        let clone = handle.clone();
        clone.stop();
        assert!(!handle.status().recording);
        assert!(handle.stop_recording().unwrap().is_none());

        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("%OpenBCI Raw EXG Data\r\n"));
        assert!(text.lines().count() > 5);
    }

    #[test]
    fn test_simulated_status() {
        let source = SimulatedSource::new(4, 125).with_seed(2);
        let handle = Pipeline::start(source, PipelineConfig::default());
        wait_for(&handle, 3);
        let status = handle.status();
        assert!(status.simulated);
        assert!(status.connected);
        assert!(!status.inference_active);
        assert!(!handle.set_inference_active(true));
    }

    #[test]
    fn test_panic_message_downcast() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
