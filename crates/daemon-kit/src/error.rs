// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy for daemon transport and spawning.

use thiserror::Error;

/// Errors from daemon transport, connection management, and spawning.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The deadline expired before the operation completed.
    #[error("deadline expired during {0}")]
    Timeout(&'static str),

    /// The peer closed the connection mid-frame.
    #[error("EOF mid-frame after {got} of {want} bytes")]
    Eof {
        /// Bytes received before the close.
        got: usize,
        /// Bytes the frame promised.
        want: usize,
    },

    /// The preamble carried an unsupported protocol version.
    #[error("unsupported protocol version {0}")]
    BadVersion(u32),

    /// The preamble declared a body larger than the protocol allows.
    #[error("oversized frame: {0} bytes")]
    Oversize(usize),

    /// No daemon connection is established and none could be made.
    #[error("daemon connection unavailable: {0}")]
    Unavailable(String),

    /// The daemon address string could not be understood.
    #[error("invalid daemon address: {0}")]
    BadAddress(String),

    /// The daemon binary could not be spawned.
    #[error("failed to spawn daemon: {0}")]
    Spawn(String),
}
