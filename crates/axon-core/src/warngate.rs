// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rate-limited warning gates.
//!
//! A handful of user-facing error conditions (registry full, high-security
//! mismatch, invalid license) must not spam the log: each class of message is
//! emitted at most once per backoff window. The gates are process-wide and
//! intentionally unsynchronized; a duplicate warning once per window under
//! racing threads is acceptable.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default backoff window between repeated warnings of one class.
pub const WARN_BACKOFF_SECONDS: i64 = 20;

/// A single warning class's backoff state.
///
/// ```
/// use axon_core::warngate::WarnGate;
///
/// static MAX_APPS_GATE: WarnGate = WarnGate::new();
///
/// if MAX_APPS_GATE.should_warn() {
///     // emit the warning
/// }
/// assert!(!MAX_APPS_GATE.should_warn());
/// ```
pub struct WarnGate {
    last_warn: AtomicI64,
    backoff_seconds: i64,
}

impl WarnGate {
    /// A gate with the default 20 second window.
    pub const fn new() -> Self {
        Self::with_backoff(WARN_BACKOFF_SECONDS)
    }

    /// A gate with a custom window.
    pub const fn with_backoff(backoff_seconds: i64) -> Self {
        Self {
            last_warn: AtomicI64::new(0),
            backoff_seconds,
        }
    }

    /// Returns `true` if the caller should emit its warning now, and arms the
    /// backoff window if so.
    pub fn should_warn(&self) -> bool {
        self.should_warn_at(unix_seconds())
    }

    /// Deterministic variant of [`should_warn`](Self::should_warn) for tests.
    pub fn should_warn_at(&self, now_seconds: i64) -> bool {
        let last = self.last_warn.load(Ordering::Relaxed);
        if now_seconds - last > self.backoff_seconds {
            self.last_warn.store(now_seconds, Ordering::Relaxed);
            return true;
        }
        false
    }
}

impl Default for WarnGate {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
