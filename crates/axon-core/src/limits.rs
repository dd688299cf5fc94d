// SPDX-License-Identifier: MIT OR Apache-2.0
//! Default limits shared between the agent and the daemon.
//!
//! These must be kept in sync with the daemon's view of the same limits.

/// Maximum number of applications tracked by one agent process.
pub const MAX_APPS: usize = 250;

/// Default maximum number of transaction events in a harvest cycle.
pub const MAX_ANALYTIC_EVENTS: i64 = 10_000;

/// Default maximum number of custom events in a transaction.
pub const MAX_CUSTOM_EVENTS: i64 = 10_000;

/// Maximum number of errors in a transaction.
pub const MAX_ERRORS: i64 = 20;

/// Maximum number of segments retained for the transaction trace.
pub const MAX_TRACE_SEGMENTS: usize = 2_000;

/// Default maximum number of span events in a transaction.
pub const SPAN_EVENTS_DEFAULT_MAX_SAMPLES_STORED: usize = 2_000;

/// Default maximum number of log events in a transaction.
pub const LOG_EVENTS_DEFAULT_MAX_SAMPLES_STORED: usize = 10_000;

/// Maximum number of span events in a single span batch.
pub const MAX_SPAN_BATCH_SIZE: usize = 1_000;

/// Exact byte length of a license key.
pub const LICENSE_SIZE: usize = 40;

/// Number of license characters kept on each side of the obfuscated form.
pub const PRINTABLE_LICENSE_WINDOW: usize = 2;

/// Protocol version carried in every frame preamble.
pub const PROTOCOL_VERSION: u32 = 2;

/// Byte length of the frame preamble: u32 message length + u32 version.
pub const PREAMBLE_LENGTH: usize = 8;

/// Upper bound for a single framed message body.
pub const CMDLEN_MAX_BYTES: usize = 32 * 1024 * 1024;

/// Size of the smallest well-formed message body (an empty envelope object).
pub const MIN_FLATBUFFER_SIZE: usize = 20;
