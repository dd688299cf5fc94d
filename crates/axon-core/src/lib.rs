// SPDX-License-Identifier: MIT OR Apache-2.0
//! axon-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Shared foundations for the axon agent: bit-exact protocol limits,
//! configuration records inspected by the core, microsecond time helpers,
//! and the rate-limited warning gate used for once-per-20-seconds log lines.

pub mod config;
pub mod limits;
pub mod time;
pub mod warngate;

pub use config::{EventLimits, RecordSql, TxnOptions};
pub use time::Ticks;
pub use warngate::WarnGate;
