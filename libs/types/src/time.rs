//! Epoch-second timestamp helpers
//!
//! All chart timestamps are Unix epoch seconds (UTC).

use chrono::{DateTime, Utc};

/// Seconds in one day, the window used for 24h change figures.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Current time in epoch seconds.
pub fn now_epoch_secs() -> i64 {
    Utc::now().timestamp()
}

/// Format epoch seconds as RFC 3339, or `None` if out of chrono's range.
pub fn format_epoch(secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.to_rfc3339())
}
