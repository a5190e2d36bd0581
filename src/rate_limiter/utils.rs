//! # Time Helpers
//!
//! Rates are configured per minute while the clock is `Instant`-based and
//! waits are `Duration`s. These helpers do the conversions in one place.
//!
//! ```text
//!     elapsed (Duration) ──► minutes (f64) ──► credits = minutes × rate
//!     deficit (credits)  ──► minutes (f64) ──► wait (Duration)
//! ```

use std::time::{Duration, Instant};

/// Seconds in a minute, as a float for credit arithmetic.
pub(crate) const SECONDS_PER_MINUTE: f64 = 60.0;

/// Longest single wait the delay path will schedule.
///
/// Waits are re-evaluated on wake-up, so capping one wait only costs an extra
/// loop iteration for absurdly small rates.
pub(crate) const MAX_WAIT: Duration = Duration::from_secs(3600);

/// Minutes elapsed from `earlier` to `later`; zero if `later` is not after
/// `earlier`.
#[inline]
pub(crate) fn minutes_between(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64() / SECONDS_PER_MINUTE
}

/// Converts a (possibly fractional) number of minutes into a `Duration`.
///
/// Negative and NaN inputs map to zero; results are capped at [`MAX_WAIT`].
#[inline]
pub(crate) fn duration_from_minutes(minutes: f64) -> Duration {
    let seconds = minutes * SECONDS_PER_MINUTE;
    if seconds.is_nan() || seconds <= 0.0 {
        Duration::ZERO
    } else if seconds >= MAX_WAIT.as_secs_f64() {
        MAX_WAIT
    } else {
        Duration::from_secs_f64(seconds)
    }
}
