//! Session logger
//!
//! Owns the file of the single open [`RecordingSession`] and appends one row
//! per dispatched sample. The dispatch worker calls [`SessionLogger::log_sample`]
//! while control and status callers on other threads open, close and query
//! the logger; a single mutex around the open session serialises all of them,
//! so no row can land in a file that is being closed.

use super::format::RecordingFormat;
use super::session::RecordingSession;
use crate::marker::Marker;
use crate::source::Sample;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Write buffer size; rows reach the disk in chunks, never fsynced per sample
const WRITE_BUFFER_BYTES: usize = 64 * 1024;

/// Errors raised by the session logger
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("a recording session is already open: {}", path.display())]
    SessionAlreadyOpen { path: PathBuf },

    #[error("sample has {got} channels, session expects {expected}")]
    ChannelMismatch { expected: usize, got: usize },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LoggerError {
    fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        LoggerError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of closing a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session: RecordingSession,
    pub samples_written: u64,
}

/// Destination of a session's rows
pub(crate) trait SessionSink: Write + Send {
    /// Push written data to durable storage
    fn sync(&mut self) -> std::io::Result<()>;
}

impl SessionSink for File {
    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_all()
    }
}

/// A session whose header is written but which receives no rows yet
pub struct PreparedSession {
    session: RecordingSession,
    writer: BufWriter<Box<dyn SessionSink>>,
}

impl PreparedSession {
    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    /// Drop the handle and delete the file
    fn discard(self) {
        let path = self.session.path;
        drop(self.writer);
        let _ = fs::remove_file(&path);
    }
}

struct OpenSession {
    session: RecordingSession,
    writer: BufWriter<Box<dyn SessionSink>>,
    next_index: u64,
}

impl OpenSession {
    fn finish(mut self) -> Result<SessionSummary, LoggerError> {
        let path = self.session.path.clone();
        self.writer
            .flush()
            .and_then(|()| self.writer.get_mut().sync())
            .map_err(|e| LoggerError::io(&path, e))?;
        Ok(SessionSummary {
            session: self.session,
            samples_written: self.next_index,
        })
    }
}

/// Persists annotated samples for one session at a time
pub struct SessionLogger {
    format: RecordingFormat,
    active: Mutex<Option<OpenSession>>,
    samples_logged: AtomicU64,
}

impl SessionLogger {
    pub fn new(channel_count: usize, sample_rate: u32) -> Self {
        Self {
            format: RecordingFormat::new(channel_count, sample_rate),
            active: Mutex::new(None),
            samples_logged: AtomicU64::new(0),
        }
    }

    pub fn format(&self) -> RecordingFormat {
        self.format
    }

    // A panic while holding the lock leaves at worst a partially written row;
    // the session itself stays usable and closable.
    fn lock(&self) -> MutexGuard<'_, Option<OpenSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_closed(&self) -> Result<(), LoggerError> {
        match self.lock().as_ref() {
            Some(open) => Err(LoggerError::SessionAlreadyOpen {
                path: open.session.path.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Create the file and write the header
    ///
    /// The patient folder is created if needed. An existing file at the target
    /// path is never overwritten.
    pub fn open(&self, session: RecordingSession) -> Result<(), LoggerError> {
        let prepared = self.prepare(session)?;
        self.install(prepared)
    }

    /// File system half of [`open`](Self::open); takes no lock while writing
    pub fn prepare(&self, session: RecordingSession) -> Result<PreparedSession, LoggerError> {
        self.ensure_closed()?;

        let path = session.path.clone();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LoggerError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| LoggerError::io(&path, e))?;
        self.prepare_with_sink(session, Box::new(file)).map_err(|e| {
            // Leave no half-written header behind
            let _ = fs::remove_file(&path);
            e
        })
    }

    pub(crate) fn prepare_with_sink(
        &self,
        session: RecordingSession,
        sink: Box<dyn SessionSink>,
    ) -> Result<PreparedSession, LoggerError> {
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_BYTES, sink);
        writer
            .write_all(self.format.header().as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|e| LoggerError::io(&session.path, e))?;
        Ok(PreparedSession { session, writer })
    }

    /// Start appending rows to a prepared session
    ///
    /// If another session was opened in the meantime the prepared file is
    /// deleted and `SessionAlreadyOpen` returned.
    pub fn install(&self, prepared: PreparedSession) -> Result<(), LoggerError> {
        let mut active = self.lock();
        if let Some(open) = active.as_ref() {
            let path = open.session.path.clone();
            drop(active);
            prepared.discard();
            return Err(LoggerError::SessionAlreadyOpen { path });
        }

        let PreparedSession { session, writer } = prepared;
        tracing::info!(
            path = %session.path.display(),
            patient = %session.patient_id,
            task = %session.task,
            channels = self.format.channel_count,
            "Recording session opened"
        );

        self.samples_logged.store(0, Ordering::Relaxed);
        *active = Some(OpenSession {
            session,
            writer,
            next_index: 0,
        });
        Ok(())
    }

    /// Append one row if a session is open
    ///
    /// Returns the row's sample index, or `None` when nothing is recording. A
    /// write failure aborts the session and is returned to the caller.
    pub fn log_sample(&self, sample: &Sample, marker: Option<Marker>) -> Result<Option<u64>, LoggerError> {
        let mut active = self.lock();
        let Some(open) = active.as_mut() else {
            return Ok(None);
        };

        if sample.channel_count() != self.format.channel_count {
            return Err(LoggerError::ChannelMismatch {
                expected: self.format.channel_count,
                got: sample.channel_count(),
            });
        }

        let index = open.next_index;
        let row = self.format.format_row(index, sample.channels(), marker);
        if let Err(e) = open.writer.write_all(row.as_bytes()) {
            let path = open.session.path.clone();
            tracing::error!(path = %path.display(), error = %e, "Recording write failed, session aborted");
            // Dropping the writer releases the handle; earlier rows stay on disk
            // as far as they were flushed.
            *active = None;
            return Err(LoggerError::io(&path, e));
        }

        open.next_index += 1;
        self.samples_logged.fetch_add(1, Ordering::Relaxed);
        Ok(Some(index))
    }

    /// Flush and release the file
    ///
    /// Safe from any thread and idempotent: with no open session this is
    /// `Ok(None)`. The session is released even when the final flush fails.
    pub fn close(&self) -> Result<Option<SessionSummary>, LoggerError> {
        let Some(open) = self.lock().take() else {
            return Ok(None);
        };
        let summary = open.finish()?;
        tracing::info!(
            path = %summary.session.path.display(),
            samples = summary.samples_written,
            "Recording session closed"
        );
        Ok(Some(summary))
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Path of the open session, if any
    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|o| o.session.path.clone())
    }

    /// Open session metadata, if any
    pub fn current_session(&self) -> Option<RecordingSession> {
        self.lock().as_ref().map(|o| o.session.clone())
    }

    /// Rows written in the current (or last) session
    pub fn samples_logged(&self) -> u64 {
        self.samples_logged.load(Ordering::Relaxed)
    }
}

impl Drop for SessionLogger {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "Failed to close recording session on shutdown");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fault::open_on_full_disk;
    use super::*;
    use crate::recording::format::read_recording;
    use crate::recording::session::Task;
    use std::io::BufReader;
    use std::sync::Arc;

    fn session_in(dir: &std::path::Path, name: &str) -> RecordingSession {
        RecordingSession::new("P001", Task::Training, dir.join("P001_Ana").join(name))
    }

    #[test]
    fn test_open_writes_header_and_creates_folder() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(8, 250);
        let session = session_in(dir.path(), "a.csv");
        let path = session.path.clone();

        logger.open(session).unwrap();
        assert!(logger.is_open());
        logger.close().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, RecordingFormat::new(8, 250).header());
    }

    #[test]
    fn test_second_open_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(2, 125);
        logger.open(session_in(dir.path(), "a.csv")).unwrap();
        let err = logger.open(session_in(dir.path(), "b.csv")).unwrap_err();
        assert!(matches!(err, LoggerError::SessionAlreadyOpen { .. }));
        // The first session is untouched
        assert!(logger.current_path().unwrap().ends_with("a.csv"));
        assert!(!dir.path().join("P001_Ana").join("b.csv").exists());
    }

    #[test]
    fn test_log_without_session_is_noop() {
        let logger = SessionLogger::new(2, 125);
        let sample = Sample::new(vec![1.0, 2.0], false);
        assert_eq!(logger.log_sample(&sample, Some(Marker::ManualA)).unwrap(), None);
        assert_eq!(logger.samples_logged(), 0);
    }

    #[test]
    fn test_rows_and_markers_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(2, 125);
        let session = session_in(dir.path(), "rt.csv");
        let path = session.path.clone();
        logger.open(session).unwrap();

        let inputs = [
            (vec![1.5, -2.0], Some(Marker::ManualA)),
            (vec![0.25, 3.75], None),
            (vec![-100.125, 42.0], Some(Marker::AutoReset)),
        ];
        for (i, (channels, marker)) in inputs.iter().enumerate() {
            let idx = logger
                .log_sample(&Sample::new(channels.clone(), false), *marker)
                .unwrap();
            assert_eq!(idx, Some(i as u64));
        }
        let summary = logger.close().unwrap().unwrap();
        assert_eq!(summary.samples_written, 3);

        let recording = read_recording(BufReader::new(File::open(&path).unwrap())).unwrap();
        assert_eq!(recording.rows.len(), 3);
        for (row, (channels, marker)) in recording.rows.iter().zip(inputs.iter()) {
            assert_eq!(&row.channels, channels);
            assert_eq!(row.marker, *marker);
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(2, 125);
        assert!(logger.close().unwrap().is_none());
        logger.open(session_in(dir.path(), "x.csv")).unwrap();
        assert!(logger.close().unwrap().is_some());
        assert!(logger.close().unwrap().is_none());
        assert!(!logger.is_open());
    }

    #[test]
    fn test_close_from_other_thread() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(SessionLogger::new(2, 125));
        logger.open(session_in(dir.path(), "t.csv")).unwrap();
        logger
            .log_sample(&Sample::new(vec![1.0, 1.0], false), None)
            .unwrap();

        let remote = Arc::clone(&logger);
        let summary = std::thread::spawn(move || remote.close().unwrap())
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(summary.samples_written, 1);
        assert!(!logger.is_open());
    }

    #[test]
    fn test_existing_file_not_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path(), "keep.csv");
        fs::create_dir_all(session.path.parent().unwrap()).unwrap();
        fs::write(&session.path, "previous session").unwrap();

        let logger = SessionLogger::new(2, 125);
        let err = logger.open(session.clone()).unwrap_err();
        assert!(matches!(err, LoggerError::Io { .. }));
        assert!(!logger.is_open());
        assert_eq!(fs::read_to_string(&session.path).unwrap(), "previous session");
    }

    #[test]
    fn test_channel_mismatch_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(3, 125);
        logger.open(session_in(dir.path(), "m.csv")).unwrap();
        let err = logger
            .log_sample(&Sample::new(vec![1.0], false), None)
            .unwrap_err();
        assert!(matches!(err, LoggerError::ChannelMismatch { expected: 3, got: 1 }));
        assert!(logger.is_open());
        assert_eq!(logger.samples_logged(), 0);
    }

    #[test]
    fn test_indices_restart_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(1, 125);
        let sample = Sample::new(vec![0.5], false);

        logger.open(session_in(dir.path(), "s1.csv")).unwrap();
        logger.log_sample(&sample, None).unwrap();
        logger.log_sample(&sample, None).unwrap();
        logger.close().unwrap();

        logger.open(session_in(dir.path(), "s2.csv")).unwrap();
        assert_eq!(logger.samples_logged(), 0);
        assert_eq!(logger.log_sample(&sample, None).unwrap(), Some(0));
    }

    #[test]
    fn test_write_failure_aborts_session() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(2, 125);
        open_on_full_disk(&logger, session_in(dir.path(), "full.csv"));

        let sample = Sample::new(vec![1.0, 2.0], false);
        let mut failure = None;
        for _ in 0..10_000 {
            if let Err(e) = logger.log_sample(&sample, None) {
                failure = Some(e);
                break;
            }
        }
        assert!(matches!(failure, Some(LoggerError::Io { .. })));
        assert!(!logger.is_open());
        // Later samples are quietly not recorded
        assert_eq!(logger.log_sample(&sample, None).unwrap(), None);
        assert!(logger.close().unwrap().is_none());

        // The next session works normally
        logger.open(session_in(dir.path(), "next.csv")).unwrap();
        assert_eq!(logger.log_sample(&sample, None).unwrap(), Some(0));
    }

    #[test]
    fn test_failed_final_flush_still_releases_session() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(2, 125);
        open_on_full_disk(&logger, session_in(dir.path(), "full.csv"));
        // Rows stay in the write buffer until close
        for _ in 0..10 {
            logger
                .log_sample(&Sample::new(vec![0.5, -0.5], false), None)
                .unwrap();
        }

        let err = logger.close().unwrap_err();
        assert!(matches!(err, LoggerError::Io { .. }));
        assert!(!logger.is_open());
        assert!(logger.close().unwrap().is_none());
    }

    #[test]
    fn test_install_after_concurrent_open_discards_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(2, 125);
        let prepared = logger.prepare(session_in(dir.path(), "late.csv")).unwrap();
        let late_path = prepared.session().path.clone();
        assert!(late_path.exists());

        logger.open(session_in(dir.path(), "first.csv")).unwrap();
        let err = logger.install(prepared).unwrap_err();
        assert!(matches!(err, LoggerError::SessionAlreadyOpen { .. }));
        assert!(!late_path.exists());
        assert!(logger.current_path().unwrap().ends_with("first.csv"));
    }
}
