//! General utilities.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Format a Unix timestamp as an RFC 3339 string (e.g., "2025-01-01T00:00:00Z").
///
/// If the timestamp is out of range for chrono's date handling, returns an
/// explicit placeholder string rather than a misleading value.
pub fn format_timestamp_iso8601(timestamp: u64) -> String {
    let Ok(timestamp) = i64::try_from(timestamp) else {
        return format!("invalid-timestamp({timestamp})");
    };

    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| format!("invalid-timestamp({timestamp})"))
}

/// Format the current time as an RFC 3339 string.
pub fn now_iso8601() -> String {
    format_timestamp_iso8601(get_now())
}

/// Get the current Unix timestamp in seconds.
///
/// When `WALLFACER_TEST_EPOCH` is set (by tests), returns that value instead
/// of the actual current time, so task/event timestamps in tests are
/// deterministic.
pub fn get_now() -> u64 {
    std::env::var("WALLFACER_TEST_EPOCH")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system clock before Unix epoch")
                .as_secs()
        })
}

/// The current time as a `DateTime<Utc>`, honoring `WALLFACER_TEST_EPOCH`
/// the same way [`get_now`] does. Every timestamp stored on a `Task` or
/// `Event` should go through this so tests can pin the clock.
pub fn now_utc() -> DateTime<Utc> {
    DateTime::from_timestamp(get_now() as i64, 0).unwrap_or_else(Utc::now)
}
