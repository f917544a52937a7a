//! Session recording
//!
//! - [`session`]: identity of one recording (patient, task, start, path)
//! - [`format`]: OpenBCI raw EXG CSV layout (writer and reader)
//! - [`logger`]: buffered per-session file writer shared across threads

pub mod format;
pub mod logger;
pub mod session;
