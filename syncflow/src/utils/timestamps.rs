//! Timestamp utilities.
//!
//! ISO strings are used inside JSON documents; the compact
//! `YYYYmmdd_HHMMSS` form is used for pipeline ids, DLQ batch ids and
//! file names.

use chrono::{DateTime, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// Format: `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`
///
/// # Examples
///
/// ```
/// use syncflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_iso8601(&Utc::now())
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats a timestamp as ISO 8601 string.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Formats a timestamp as `YYYYmmdd_HHMMSS`.
#[must_use]
pub fn compact_timestamp(dt: &Timestamp) -> String {
    dt.format("%Y%m%d_%H%M%S").to_string()
}

/// Seconds elapsed between two timestamps, never negative.
#[must_use]
pub fn elapsed_secs(start: &Timestamp, end: &Timestamp) -> f64 {
    let micros = (*end - *start).num_microseconds().unwrap_or(0).max(0);
    #[allow(clippy::cast_precision_loss)]
    let secs = micros as f64 / 1_000_000.0;
    secs
}
