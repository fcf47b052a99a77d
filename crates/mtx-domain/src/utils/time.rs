//! Canonical time utilities — strict, no fallbacks.
//!
//! All functions return `Result` instead of silently defaulting to 0.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::Error;

/// Returns the current Unix timestamp in milliseconds as `u64`.
///
/// # Errors
///
/// Returns an error if the system clock is before the Unix epoch (extremely rare,
/// but we refuse to silently return 0).
pub fn epoch_millis_u64() -> Result<u64, Error> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::internal(format!("system clock is before Unix epoch: {e}")))?;
    u64::try_from(duration.as_millis())
        .map_err(|e| Error::internal(format!("timestamp overflow for u64: {e}")))
}

/// Returns the current UTC wall-clock time.
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Formats a timestamp as ISO-8601 with millisecond precision (the wire form
/// used in envelope metadata and history entries).
#[must_use]
pub fn to_iso(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
