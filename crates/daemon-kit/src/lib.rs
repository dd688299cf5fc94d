// SPDX-License-Identifier: MIT OR Apache-2.0
//! daemon-kit
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Client-side plumbing for the out-of-process daemon: length+version
//! preamble framing with absolute deadlines, a single-flight connection
//! manager over the daemon descriptor, the daemon argv builder, and the
//! fork/exec spawn helper.
//!
//! The daemon is treated as an opaque store-and-forward peer; everything
//! here is transport, not protocol.

pub mod argv;
pub mod conn;
pub mod error;
pub mod frame;
pub mod spawn;

pub use argv::{DaemonArgs, UtilizationFlags, daemon_args_to_argv};
pub use conn::{DaemonAddress, DaemonConnection};
pub use error::DaemonError;
pub use frame::{read_framed, write_framed};
pub use spawn::spawn_daemon;
