// SPDX-License-Identifier: MIT OR Apache-2.0
//! Microsecond time helpers.
//!
//! All protocol-visible durations and timestamps are integer microseconds;
//! deadlines for socket I/O use [`std::time::Instant`] so that retry loops do
//! not drift under interruption.

use std::time::{SystemTime, UNIX_EPOCH};

/// A duration or timestamp in microseconds.
pub type Ticks = u64;

/// Microseconds per second.
pub const US_PER_SECOND: Ticks = 1_000_000;

/// Microseconds per millisecond.
pub const US_PER_MS: Ticks = 1_000;

/// Current wall-clock time in microseconds since the Unix epoch.
///
/// Clamps to zero if the system clock reads before the epoch.
pub fn wall_clock_now() -> Ticks {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as Ticks)
        .unwrap_or(0)
}

/// The non-negative distance between two tick values.
///
/// The operands may be given in either order; wall-clock adjustments can make
/// "later" timestamps read earlier than "earlier" ones.
pub fn duration(a: Ticks, b: Ticks) -> Ticks {
    a.abs_diff(b)
}

/// Convert ticks to whole milliseconds.
pub fn to_ms(t: Ticks) -> u64 {
    t / US_PER_MS
}

/// Convert ticks to fractional milliseconds.
pub fn to_ms_f64(t: Ticks) -> f64 {
    t as f64 / US_PER_MS as f64
}

/// Convert ticks to fractional seconds.
pub fn to_secs_f64(t: Ticks) -> f64 {
    t as f64 / US_PER_SECOND as f64
}
