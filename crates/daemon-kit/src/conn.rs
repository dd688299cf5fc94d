// SPDX-License-Identifier: MIT OR Apache-2.0
//! The daemon connection manager.
//!
//! One descriptor, one in-flight command: a process-wide mutex serializes
//! every request/reply pair and one-way send for their entire duration. On
//! any transport failure the descriptor is closed so the next command
//! reconnects from scratch.

use crate::error::DaemonError;
use crate::frame::{Conduit, read_framed, write_framed};
use parking_lot::Mutex;
use std::io;
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Where the daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonAddress {
    /// A Unix-domain socket path.
    UnixPath(PathBuf),
    /// A Linux abstract-namespace socket (spelled `@name`).
    Abstract(String),
    /// A loopback TCP port.
    Port(u16),
}

impl DaemonAddress {
    /// Parse an address string: a numeric port, an `@`-prefixed abstract
    /// socket name, or a Unix socket path.
    pub fn parse(address: &str) -> Result<Self, DaemonError> {
        if address.is_empty() {
            return Err(DaemonError::BadAddress(address.to_owned()));
        }
        if let Ok(port) = address.parse::<u16>() {
            return Ok(Self::Port(port));
        }
        if let Some(name) = address.strip_prefix('@') {
            return Ok(Self::Abstract(name.to_owned()));
        }
        Ok(Self::UnixPath(PathBuf::from(address)))
    }
}

impl std::fmt::Display for DaemonAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnixPath(path) => write!(f, "{}", path.display()),
            Self::Abstract(name) => write!(f, "@{name}"),
            Self::Port(port) => write!(f, "{port}"),
        }
    }
}

/// A connected daemon stream.
#[derive(Debug)]
enum DaemonStream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Conduit for DaemonStream {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Unix(s) => s.recv(buf),
            Self::Tcp(s) => s.recv(buf),
        }
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Unix(s) => s.send(buf),
            Self::Tcp(s) => s.send(buf),
        }
    }

    fn set_recv_timeout(&self, t: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Unix(s) => s.set_recv_timeout(t),
            Self::Tcp(s) => s.set_recv_timeout(t),
        }
    }

    fn set_send_timeout(&self, t: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Unix(s) => s.set_send_timeout(t),
            Self::Tcp(s) => s.set_send_timeout(t),
        }
    }
}

fn dial(address: &DaemonAddress) -> Result<DaemonStream, DaemonError> {
    match address {
        DaemonAddress::UnixPath(path) => Ok(DaemonStream::Unix(UnixStream::connect(path)?)),
        DaemonAddress::Abstract(name) => {
            #[cfg(target_os = "linux")]
            {
                use std::os::linux::net::SocketAddrExt;
                let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
                Ok(DaemonStream::Unix(UnixStream::connect_addr(&addr)?))
            }
            #[cfg(not(target_os = "linux"))]
            {
                Err(DaemonError::BadAddress(format!("@{name}")))
            }
        }
        DaemonAddress::Port(port) => Ok(DaemonStream::Tcp(TcpStream::connect((
            std::net::Ipv4Addr::LOCALHOST,
            *port,
        ))?)),
    }
}

/// The single-flight daemon connection.
///
/// All request/reply pairs and one-way sends hold the internal lock for
/// their entire duration, so commands issued by one worker are totally
/// ordered on the wire.
#[derive(Debug)]
pub struct DaemonConnection {
    address: DaemonAddress,
    stream: Mutex<Option<DaemonStream>>,
}

impl DaemonConnection {
    /// A manager for the daemon at `address`. No connection is made until
    /// the first command.
    pub fn new(address: DaemonAddress) -> Self {
        Self {
            address,
            stream: Mutex::new(None),
        }
    }

    /// The configured daemon address.
    pub fn address(&self) -> &DaemonAddress {
        &self.address
    }

    /// Whether a descriptor is currently held.
    pub fn is_connected(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// Close and invalidate the descriptor; the next command reconnects.
    pub fn invalidate(&self) {
        if self.stream.lock().take().is_some() {
            debug!(target: "axon.daemon", address = %self.address, "daemon connection closed");
        }
    }

    /// Send one framed command and wait for a framed reply, holding the
    /// single-flight lock for the whole exchange.
    pub fn exchange(&self, body: &[u8], deadline: Instant) -> Result<Vec<u8>, DaemonError> {
        let mut guard = self.stream.lock();
        let stream = Self::ensure_connected(&self.address, &mut *guard)?;

        let result = write_framed(stream, body, Some(deadline))
            .and_then(|()| read_framed(stream, Some(deadline)));

        if let Err(e) = &result {
            warn!(target: "axon.daemon", address = %self.address, error = %e,
                  "daemon exchange failed; dropping connection");
            *guard = None;
        }
        result
    }

    /// Send one framed command without waiting for a reply, holding the
    /// single-flight lock for the whole send.
    pub fn send(&self, body: &[u8], deadline: Instant) -> Result<(), DaemonError> {
        let mut guard = self.stream.lock();
        let stream = Self::ensure_connected(&self.address, &mut *guard)?;

        let result = write_framed(stream, body, Some(deadline));

        if let Err(e) = &result {
            warn!(target: "axon.daemon", address = %self.address, error = %e,
                  "daemon send failed; dropping connection");
            *guard = None;
        }
        result
    }

    fn ensure_connected<'a>(
        address: &DaemonAddress,
        guard: &'a mut Option<DaemonStream>,
    ) -> Result<&'a DaemonStream, DaemonError> {
        if guard.is_none() {
            match dial(address) {
                Ok(stream) => {
                    debug!(target: "axon.daemon", address = %address, "daemon connection established");
                    *guard = Some(stream);
                }
                Err(e) => {
                    return Err(DaemonError::Unavailable(format!("{address}: {e}")));
                }
            }
        }
        Ok(guard.as_ref().expect("connection was just established"))
    }
}
