//! Timestamp helpers shared by the scheduler, the DLQ and state persistence.

pub mod timestamps;

pub use timestamps::{
    compact_timestamp, elapsed_secs, format_iso8601, iso_timestamp, now_utc, Timestamp,
};
