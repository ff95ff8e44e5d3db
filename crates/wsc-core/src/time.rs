//! Time utilities for wsconnect
//!
//! Lock deadlines are wall-clock Unix millis because they are compared across
//! processes.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds (0 if the clock is before the epoch)
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Unix millis `after` from now
pub fn deadline_after(after: Duration) -> u64 {
    current_time_millis().saturating_add(after.as_millis() as u64)
}

/// Whether a millisecond deadline has passed
pub fn is_expired(deadline_millis: u64) -> bool {
    deadline_millis <= current_time_millis()
}
