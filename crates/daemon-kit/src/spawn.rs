// SPDX-License-Identifier: MIT OR Apache-2.0
//! Daemon process spawning.
//!
//! The only module in the workspace that needs raw process control: fork,
//! file-descriptor hygiene, and exec. The parent waits on the forked child;
//! the child execs the daemon binary, which detaches into its own session.
#![allow(unsafe_code)]

use crate::argv::{DaemonArgs, daemon_args_to_argv};
use crate::error::DaemonError;
use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use tracing::{debug, error, info, warn};

fn last_errno() -> std::io::Error {
    std::io::Error::last_os_error()
}

/// Close all file descriptors greater than or equal to `lowfd`, using the
/// most efficient enumeration available.
fn close_from(lowfd: RawFd) {
    unsafe {
        let fd_dir = CStr::from_bytes_with_nul(b"/proc/self/fd\0").expect("static CStr");
        let dirp = libc::opendir(fd_dir.as_ptr());
        if !dirp.is_null() {
            let dir_fd = libc::dirfd(dirp);
            loop {
                let entry = libc::readdir(dirp);
                if entry.is_null() {
                    break;
                }
                let name = CStr::from_ptr((*entry).d_name.as_ptr());
                let Ok(fd) = name.to_string_lossy().parse::<RawFd>() else {
                    continue;
                };
                if fd >= lowfd && fd != dir_fd {
                    libc::close(fd);
                }
            }
            libc::closedir(dirp);
            return;
        }

        // Fall back to sweeping every possible descriptor.
        let mut maxfd = libc::sysconf(libc::_SC_OPEN_MAX);
        if !(0..=64 * 1024).contains(&maxfd) {
            maxfd = 64 * 1024;
        }
        for fd in lowfd..maxfd as RawFd {
            libc::close(fd);
        }
    }
}

/// Spawn the daemon binary at `path` with the given arguments.
///
/// The child redirects stdin to `/dev/null`, stdout and stderr to
/// `log_fd` (so daemon output is not lost before it opens its own log),
/// closes all other descriptors, and execs. The parent waits for the
/// child, which returns promptly because the daemon detaches into its own
/// session.
///
/// Returns the child pid.
pub fn spawn_daemon(
    path: &Path,
    args: Option<&DaemonArgs>,
    log_fd: Option<RawFd>,
) -> Result<libc::pid_t, DaemonError> {
    if args.is_none() {
        warn!(target: "axon.daemon", "no daemon arguments given");
        return Err(DaemonError::Spawn("no daemon arguments given".into()));
    }
    if path.as_os_str().is_empty() {
        warn!(target: "axon.daemon", "no daemon location specified");
        return Err(DaemonError::Spawn("no daemon location specified".into()));
    }

    let path_c = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| DaemonError::Spawn(format!("daemon path contains NUL: {path:?}")))?;

    if unsafe { libc::access(path_c.as_ptr(), libc::X_OK) } == -1 {
        let errno = last_errno();
        warn!(target: "axon.daemon", path = %path.display(), error = %errno,
              "couldn't find daemon");
        return Err(DaemonError::Spawn(format!(
            "daemon not executable: {}: {errno}",
            path.display()
        )));
    }

    // Everything the child needs must be materialized before the fork.
    let argv = daemon_args_to_argv(&path.to_string_lossy(), args);
    for (i, arg) in argv.iter().enumerate() {
        debug!(target: "axon.daemon", "exec[{i}]={arg}");
    }

    let argv_c: Vec<CString> = argv
        .iter()
        .map(|arg| CString::new(OsStr::new(arg).as_bytes()))
        .collect::<Result<_, _>>()
        .map_err(|_| DaemonError::Spawn("daemon argument contains NUL".into()))?;
    let mut argv_ptrs: Vec<*const libc::c_char> =
        argv_c.iter().map(|arg| arg.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    let pid = unsafe { libc::fork() };

    if pid == -1 {
        let errno = last_errno();
        error!(target: "axon.daemon", error = %errno, "failed to fork daemon");
        return Err(DaemonError::Spawn(format!("fork failed: {errno}")));
    }

    if pid != 0 {
        // Parent. Wait for the child to exec and for the daemon to detach
        // into its own session, which prevents a defunct process from
        // lingering in the worker's process table.
        info!(target: "axon.daemon", pid, "spawned daemon child");
        let mut status = 0;
        unsafe { libc::waitpid(pid, &mut status, 0) };
        return Ok(pid);
    }

    // Child. Redirect stdin to /dev/null.
    unsafe {
        let devnull = CStr::from_bytes_with_nul(b"/dev/null\0").expect("static CStr");
        let nullfd = libc::open(devnull.as_ptr(), libc::O_RDWR, 0o666);
        if nullfd != -1 {
            libc::dup2(nullfd, 0);
            libc::close(nullfd);
        }

        // The daemon prints errors to stderr until it opens its own log
        // file; point stdout and stderr at the agent log meanwhile.
        if let Some(fd) = log_fd {
            libc::dup2(fd, 1);
            libc::dup2(fd, 2);
        }

        // Do not inherit any additional file descriptors.
        close_from(3);

        libc::execvp(path_c.as_ptr(), argv_ptrs.as_ptr());
        libc::_exit(0)
    }
}
