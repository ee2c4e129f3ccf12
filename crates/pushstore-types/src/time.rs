//! Wall-clock helpers.

use chrono::Utc;

/// Seconds since the UNIX epoch.
pub fn sec_since_epoch() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Milliseconds since the UNIX epoch.
pub fn ms_since_epoch() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
