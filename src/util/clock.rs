//! Wall-clock helpers shared by the scheduler and the ledger.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Current UTC time.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Time remaining until `at`; instants in the past yield zero.
#[must_use]
pub fn until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

/// Seconds elapsed between two instants, with millisecond precision.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn elapsed_secs(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

/// Convert a second count into a chrono delta, saturating at the maximum.
#[must_use]
pub fn delta_secs(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}
