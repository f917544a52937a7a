//! Streaming backbone
//!
//! - [`dispatcher`]: per-sample annotation and fan-out
//! - [`pipeline`]: dispatch worker thread and its control handle
//! - [`status`]: status snapshot for presentation layers

pub mod dispatcher;
pub mod pipeline;
pub mod status;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Queue depth per display subscriber (2 s at 125 Hz)
pub const DEFAULT_DISPLAY_CAPACITY: usize = 256;

/// A network source is reported disconnected after this much silence
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(2);

/// Lock, recovering the data if a dispatch panic poisoned the mutex
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
