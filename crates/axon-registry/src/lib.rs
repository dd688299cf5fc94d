// SPDX-License-Identifier: MIT OR Apache-2.0
//! axon-registry
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The application registry: a bounded, lock-protected table of
//! application identities, the per-app daemon-query backoff state
//! machine, and the reply-processing routine that installs routing
//! rules, event-limit overrides, and harvest timing received from the
//! daemon.
//!
//! Lock order is list lock then per-app lock; the list lock is never
//! held while a per-app lock is awaited across a daemon exchange.

pub mod app;
pub mod query;
pub mod registry;
pub mod reply;

pub use app::{App, AppHandle, AppState, HarvestTiming, RuleSet};
pub use query::{APPINFO_QUERY_TIMEOUT, consider_appinfo, query_app_state};
pub use registry::Registry;
pub use reply::{compute_event_limits, process_reply};

use thiserror::Error;

/// Errors from registry operations against the daemon.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Wire-level protocol failure.
    #[error(transparent)]
    Proto(#[from] axon_proto::ProtoError),

    /// Transport failure talking to the daemon.
    #[error(transparent)]
    Daemon(#[from] daemon_kit::DaemonError),

    /// The connect reply carried unusable JSON.
    #[error("bad connect reply: {0}")]
    BadConnectReply(#[from] serde_json::Error),

    /// A query message failed its own framing self-check.
    #[error("refusing to send corrupt appinfo message, len={0}")]
    CorruptQuery(usize),
}
