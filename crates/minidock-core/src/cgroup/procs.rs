//! Process membership (`cgroup.procs`).

use std::os::fd::{AsFd, OwnedFd};
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

/// Longest decimal rendering of a `u32`.
const PID_DIGITS: usize = 10;

/// Renders `pid` in decimal into `buf` without allocating.
pub fn format_pid(pid: u32, buf: &mut [u8; PID_DIGITS]) -> &[u8] {
    let mut value = pid;
    let mut start = PID_DIGITS;
    loop {
        start -= 1;
        // value % 10 < 10, so the cast cannot truncate
        #[allow(clippy::cast_possible_truncation)]
        let digit = (value % 10) as u8;
        buf[start] = b'0' + digit;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    &buf[start..]
}

/// Opens a group's membership file for writing, close-on-exec.
///
/// The descriptor stays valid after the caller switches its root, so the
/// pid can still be written once the host path is out of reach.
///
/// # Errors
///
/// Returns the raw I/O error; a missing file is not created.
pub fn open_procs(procs_file: &Path) -> std::io::Result<OwnedFd> {
    let file = std::fs::OpenOptions::new().write(true).open(procs_file)?;
    Ok(OwnedFd::from(file))
}

/// Joins `pid` to the group whose membership file `procs` refers to.
///
/// Safe to call between `fork` and `exec`: the pid is formatted on the stack
/// and written with a single `write(2)`. Nothing is logged.
///
/// # Errors
///
/// Returns the `write(2)` errno, or `EIO` if the kernel took only part of it.
pub fn write_pid<Fd: AsFd>(procs: Fd, pid: u32) -> nix::Result<()> {
    let mut buf = [0u8; PID_DIGITS];
    let digits = format_pid(pid, &mut buf);
    let written = nix::unistd::write(procs, digits)?;
    if written == digits.len() {
        Ok(())
    } else {
        Err(Errno::EIO)
    }
}

/// Reads the member pids; entries that are not decimal pids are skipped.
///
/// # Errors
///
/// Returns the raw I/O error if the file cannot be read.
pub fn read_pids(procs_file: &Path) -> std::io::Result<Vec<Pid>> {
    let raw = std::fs::read_to_string(procs_file)?;
    Ok(raw
        .lines()
        .filter_map(|line| line.trim().parse::<i32>().ok())
        .filter(|pid| *pid > 0)
        .map(Pid::from_raw)
        .collect())
}

/// Sends `SIGKILL` to every pid, returning how many were signalled.
///
/// Processes that have already gone away are not an error.
pub fn kill_all(pids: &[Pid]) -> usize {
    let mut killed = 0;
    for &pid in pids {
        match kill(pid, Signal::SIGKILL) {
            Ok(()) => {
                killed += 1;
                tracing::debug!(pid = pid.as_raw(), "sent SIGKILL to cgroup member");
            }
            Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pid = pid.as_raw(), error = %e, "failed to kill cgroup member"),
        }
    }
    killed
}
