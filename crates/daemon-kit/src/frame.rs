// SPDX-License-Identifier: MIT OR Apache-2.0
//! Length+version preamble framing with absolute deadlines.
//!
//! Every timeout here is a point in time rather than a duration, so retry
//! loops through short reads and interruptions do not drift.

use crate::error::DaemonError;
use axon_core::limits::{CMDLEN_MAX_BYTES, PREAMBLE_LENGTH, PROTOCOL_VERSION};
use std::io;
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

/// A bidirectional byte stream with kernel-level send/receive timeouts.
///
/// Implemented for the two stream types the daemon listens on. All methods
/// take `&self`; both std stream types support shared-reference I/O.
pub trait Conduit {
    /// Receive up to `buf.len()` bytes.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
    /// Send up to `buf.len()` bytes.
    fn send(&self, buf: &[u8]) -> io::Result<usize>;
    /// Bound the next receive.
    fn set_recv_timeout(&self, t: Option<Duration>) -> io::Result<()>;
    /// Bound the next send.
    fn set_send_timeout(&self, t: Option<Duration>) -> io::Result<()>;
}

impl Conduit for UnixStream {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn set_recv_timeout(&self, t: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(t)
    }

    fn set_send_timeout(&self, t: Option<Duration>) -> io::Result<()> {
        self.set_write_timeout(t)
    }
}

impl Conduit for TcpStream {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn set_recv_timeout(&self, t: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(t)
    }

    fn set_send_timeout(&self, t: Option<Duration>) -> io::Result<()> {
        self.set_write_timeout(t)
    }
}

/// Encode the 8-byte frame preamble for a body of `len` bytes.
pub fn write_preamble(len: u32) -> [u8; PREAMBLE_LENGTH] {
    let mut preamble = [0u8; PREAMBLE_LENGTH];
    preamble[..4].copy_from_slice(&len.to_le_bytes());
    preamble[4..].copy_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    preamble
}

/// Validate a frame preamble and return the declared body length.
pub fn parse_preamble(preamble: &[u8; PREAMBLE_LENGTH]) -> Result<u32, DaemonError> {
    let len = u32::from_le_bytes(preamble[..4].try_into().expect("slice is 4 bytes"));
    let version = u32::from_le_bytes(preamble[4..].try_into().expect("slice is 4 bytes"));

    if version != PROTOCOL_VERSION {
        return Err(DaemonError::BadVersion(version));
    }
    if len as usize > CMDLEN_MAX_BYTES {
        return Err(DaemonError::Oversize(len as usize));
    }
    Ok(len)
}

/// Time remaining until `deadline`, or an error when it has passed.
fn budget(deadline: Option<Instant>, what: &'static str) -> Result<Option<Duration>, DaemonError> {
    match deadline {
        None => Ok(None),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return Err(DaemonError::Timeout(what));
            }
            Ok(Some(deadline - now))
        }
    }
}

/// Write all of `buf`, retrying short writes and interruptions, and
/// observing `deadline` before each syscall.
pub fn write_full<C: Conduit>(
    stream: &C,
    mut buf: &[u8],
    deadline: Option<Instant>,
) -> Result<(), DaemonError> {
    while !buf.is_empty() {
        stream.set_send_timeout(budget(deadline, "write")?)?;
        match stream.send(buf) {
            Ok(0) => {
                return Err(DaemonError::Eof {
                    got: 0,
                    want: buf.len(),
                });
            }
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                return Err(DaemonError::Timeout("write"));
            }
            Err(e) => return Err(DaemonError::Io(e)),
        }
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes, accumulating partial reads and
/// observing `deadline` before each syscall.
pub fn read_full<C: Conduit>(
    stream: &C,
    buf: &mut [u8],
    deadline: Option<Instant>,
) -> Result<(), DaemonError> {
    let want = buf.len();
    let mut got = 0usize;

    while got < want {
        stream.set_recv_timeout(budget(deadline, "read")?)?;
        match stream.recv(&mut buf[got..]) {
            Ok(0) => return Err(DaemonError::Eof { got, want }),
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                return Err(DaemonError::Timeout("read"));
            }
            Err(e) => return Err(DaemonError::Io(e)),
        }
    }
    Ok(())
}

/// Write one framed message: the preamble, then `body`.
pub fn write_framed<C: Conduit>(
    stream: &C,
    body: &[u8],
    deadline: Option<Instant>,
) -> Result<(), DaemonError> {
    if body.len() > CMDLEN_MAX_BYTES {
        return Err(DaemonError::Oversize(body.len()));
    }
    write_full(stream, &write_preamble(body.len() as u32), deadline)?;
    write_full(stream, body, deadline)
}

/// Read one framed message, returning the body.
pub fn read_framed<C: Conduit>(
    stream: &C,
    deadline: Option<Instant>,
) -> Result<Vec<u8>, DaemonError> {
    let mut preamble = [0u8; PREAMBLE_LENGTH];
    read_full(stream, &mut preamble, deadline)?;

    let len = parse_preamble(&preamble)? as usize;
    let mut body = vec![0u8; len];
    read_full(stream, &mut body, deadline)?;
    Ok(body)
}
