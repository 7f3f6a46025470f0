//! Waiting for the isolated process, with cancellation.
//!
//! A waiter thread owns the [`Child`] and blocks in `wait`. Its result and
//! any cancellation request arrive on the same channel, so the supervisor
//! sleeps in a single `recv` and never polls. The reap and every signal the
//! supervisor sends are serialised by one lock, so a signal never reaches a
//! recycled pid.

use std::process::{Child, ExitStatus};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use minidock_common::error::{MinidockError, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{Id, WaitPidFlag, waitid};
use nix::unistd::Pid;

/// Something the supervisor has to react to.
#[derive(Debug)]
pub enum SupervisorEvent {
    /// The waiter thread reaped the isolated process.
    Exited(std::io::Result<ExitStatus>),
    /// The operator asked the container to stop.
    Cancelled,
}

/// Requests cancellation of a running container. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Sender<SupervisorEvent>,
}

impl CancelHandle {
    /// Asks the supervisor to stop the container.
    ///
    /// Never fails; a request after the container finished is ignored.
    pub fn cancel(&self) {
        let _ = self.tx.send(SupervisorEvent::Cancelled);
    }
}

/// Receiving side of the cancellation channel, consumed by a launch.
#[derive(Debug)]
pub struct CancelSignal {
    tx: Sender<SupervisorEvent>,
    rx: Receiver<SupervisorEvent>,
}

/// Creates a connected cancel handle and signal.
#[must_use]
pub fn channel() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = mpsc::channel();
    (CancelHandle { tx: tx.clone() }, CancelSignal { tx, rx })
}

/// How supervision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supervision {
    /// The program finished on its own.
    Exited(ExitStatus),
    /// The program was stopped after a cancellation request.
    Cancelled(ExitStatus),
}

/// Blocks until `child` exits or `signal` is cancelled.
///
/// On cancellation the process gets `SIGTERM` and `stop_timeout` to exit.
/// After that it is killed, `backstop` runs once to sweep whatever else is
/// left in the container, and the supervisor keeps waiting for the reap.
/// A process that exits just as the request arrives is reported as
/// [`Supervision::Exited`] and never signalled.
///
/// # Errors
///
/// Returns [`MinidockError::Supervision`] if the waiter thread cannot be
/// started, `wait` fails, or the waiter ends without reaping.
pub fn supervise(
    child: Child,
    signal: CancelSignal,
    stop_timeout: Duration,
    backstop: impl FnOnce(),
) -> Result<Supervision> {
    let CancelSignal { tx, rx } = signal;
    let pid = Pid::from_raw(i32::try_from(child.id()).map_err(|_| supervision("pid out of range"))?);
    let reap = Arc::new(Mutex::new(()));
    spawn_waiter(child, pid, ExitNotifier::new(tx), Arc::clone(&reap))?;

    match rx.recv() {
        Ok(SupervisorEvent::Exited(status)) => {
            let status = status.map_err(wait_failed)?;
            tracing::info!(pid = pid.as_raw(), status = %status, "isolated process exited");
            return Ok(Supervision::Exited(status));
        }
        Ok(SupervisorEvent::Cancelled) => {
            tracing::info!(pid = pid.as_raw(), "cancellation requested, stopping container");
        }
        Err(_) => return Err(supervision("waiter thread vanished")),
    }

    if let Some(status) = signal_unless_exited(&rx, &reap, pid, Signal::SIGTERM) {
        let status = status.map_err(wait_failed)?;
        tracing::info!(pid = pid.as_raw(), status = %status, "isolated process exited before it was stopped");
        return Ok(Supervision::Exited(status));
    }
    let status = wait_after_cancel(&rx, &reap, pid, stop_timeout, backstop)?;
    tracing::info!(pid = pid.as_raw(), status = %status, "container stopped");
    Ok(Supervision::Cancelled(status))
}

/// Delivers the waiter's result, or a failure if the waiter ends without one.
#[derive(Debug)]
struct ExitNotifier {
    tx: Option<Sender<SupervisorEvent>>,
}

impl ExitNotifier {
    const fn new(tx: Sender<SupervisorEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    fn send(mut self, status: std::io::Result<ExitStatus>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(SupervisorEvent::Exited(status));
        }
    }
}

impl Drop for ExitNotifier {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let lost = std::io::Error::other("waiter thread ended without reaping");
            let _ = tx.send(SupervisorEvent::Exited(Err(lost)));
        }
    }
}

/// Starts the thread that reaps `child`.
///
/// The reap happens under `reap`, and the result is sent before the lock is
/// released, so a supervisor holding the lock either sees the exit queued or
/// knows the pid still belongs to `child`.
fn spawn_waiter(mut child: Child, pid: Pid, notifier: ExitNotifier, reap: Arc<Mutex<()>>) -> Result<()> {
    let _ = std::thread::Builder::new()
        .name("minidock-wait".into())
        .spawn(move || {
            let _held = wait_unreaped(pid).then(|| lock(&reap));
            notifier.send(child.wait());
        })
        .map_err(|e| supervision(format!("cannot start waiter thread: {e}")))?;
    Ok(())
}

/// Blocks until `pid` has exited, leaving it a zombie.
///
/// Returns `false` if that cannot be observed; the caller then reaps blind.
fn wait_unreaped(pid: Pid) -> bool {
    loop {
        match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Ok(_) => return true,
            Err(Errno::EINTR) => {}
            Err(e) => {
                tracing::debug!(pid = pid.as_raw(), error = %e, "cannot wait without reaping");
                return false;
            }
        }
    }
}

fn lock(reap: &Mutex<()>) -> MutexGuard<'_, ()> {
    reap.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sends `signal` to `pid` unless an exit is already queued.
///
/// Returns the queued exit instead of signalling: by then the pid has been
/// reaped and may belong to another process.
fn signal_unless_exited(
    rx: &Receiver<SupervisorEvent>,
    reap: &Mutex<()>,
    pid: Pid,
    signal: Signal,
) -> Option<std::io::Result<ExitStatus>> {
    let _held = lock(reap);
    while let Ok(event) = rx.try_recv() {
        if let SupervisorEvent::Exited(status) = event {
            return Some(status);
        }
    }
    send_signal(pid, signal);
    None
}

fn wait_after_cancel(
    rx: &Receiver<SupervisorEvent>,
    reap: &Mutex<()>,
    pid: Pid,
    stop_timeout: Duration,
    backstop: impl FnOnce(),
) -> Result<ExitStatus> {
    let deadline = Instant::now() + stop_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(SupervisorEvent::Exited(status)) => return status.map_err(wait_failed),
            // repeated requests do not extend the window
            Ok(SupervisorEvent::Cancelled) => {}
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => return Err(supervision("waiter thread vanished")),
        }
    }

    tracing::warn!(
        pid = pid.as_raw(),
        timeout_ms = stop_timeout.as_millis(),
        "container ignored SIGTERM, killing"
    );
    if let Some(status) = signal_unless_exited(rx, reap, pid, Signal::SIGKILL) {
        return status.map_err(wait_failed);
    }
    backstop();

    loop {
        match rx.recv() {
            Ok(SupervisorEvent::Exited(status)) => return status.map_err(wait_failed),
            Ok(SupervisorEvent::Cancelled) => {}
            Err(_) => return Err(supervision("waiter thread vanished")),
        }
    }
}

fn send_signal(pid: Pid, signal: Signal) {
    match kill(pid, signal) {
        Ok(()) => tracing::debug!(pid = pid.as_raw(), signal = %signal, "signal sent"),
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid = pid.as_raw(), signal = %signal, error = %e, "failed to signal isolated process"),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn wait_failed(e: std::io::Error) -> MinidockError {
    supervision(format!("wait failed: {e}"))
}

fn supervision(message: impl Into<String>) -> MinidockError {
    MinidockError::Supervision {
        message: message.into(),
    }
}
