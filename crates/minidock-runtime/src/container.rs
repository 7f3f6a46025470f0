//! Container specification and the per-launch handle.

use std::path::PathBuf;

use minidock_common::constants::HOSTNAME_MAX_LEN;
use minidock_common::error::{MinidockError, Result};
use minidock_common::types::{ContainerId, ResourceLimits};
use minidock_core::cgroup::ResourceController;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

/// What to run and how to confine it. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Directory that becomes the container's `/`.
    pub rootfs: PathBuf,
    /// Hostname inside the UTS namespace.
    pub hostname: Option<String>,
    /// Memory and CPU limits; a cgroup is created when any is set.
    pub resource_limits: Option<ResourceLimits>,
    /// Program to execute, resolved via `PATH` inside `rootfs`.
    pub command: String,
    /// Arguments passed after the program name.
    pub args: Vec<String>,
}

impl ContainerSpec {
    /// Creates a spec with no hostname, no limits and no arguments.
    #[must_use]
    pub fn new(rootfs: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            rootfs: rootfs.into(),
            hostname: None,
            resource_limits: None,
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Sets the container hostname.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Sets the resource limits.
    #[must_use]
    pub const fn limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = Some(limits);
        self
    }

    /// Sets the command arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Returns whether launching this spec needs a cgroup.
    #[must_use]
    pub fn requests_group(&self) -> bool {
        self.resource_limits
            .is_some_and(|limits| limits.requests_group())
    }

    /// Rejects a spec before anything touches the OS.
    ///
    /// # Errors
    ///
    /// Returns [`MinidockError::Validation`] if the rootfs is not an existing
    /// directory, the command is empty, the hostname is unusable, or a CPU
    /// limit is not a positive number.
    pub fn validate(&self) -> Result<()> {
        if !self.rootfs.is_dir() {
            return Err(invalid(format!(
                "rootfs '{}' does not exist or is not a directory",
                self.rootfs.display()
            )));
        }
        if self.command.is_empty() {
            return Err(invalid("command is empty".into()));
        }
        if self.command.contains('\0') || self.args.iter().any(|a| a.contains('\0')) {
            return Err(invalid("command line contains a NUL byte".into()));
        }
        if let Some(hostname) = &self.hostname {
            if hostname.is_empty() || hostname.len() > HOSTNAME_MAX_LEN || hostname.contains('\0') {
                return Err(invalid(format!("invalid hostname '{hostname}'")));
            }
        }
        if let Some(cores) = self.resource_limits.and_then(|l| l.cpu_cores) {
            if !cores.is_finite() || cores <= 0.0 {
                return Err(invalid(format!("CPU limit must be positive, got {cores}")));
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> MinidockError {
    MinidockError::Validation { message }
}

/// One running container instance.
///
/// Owned by the launcher, which is its only mutator. Cleanup runs at most
/// once, either explicitly or when the handle is dropped.
#[derive(Debug)]
pub struct ContainerHandle {
    id: ContainerId,
    pid: Option<u32>,
    controller: Option<ResourceController>,
    reaped: bool,
    cleaned: bool,
}

impl ContainerHandle {
    /// Creates a handle. `controller` is set only if a group was created.
    #[must_use]
    pub const fn new(id: ContainerId, controller: Option<ResourceController>) -> Self {
        Self {
            id,
            pid: None,
            controller,
            reaped: false,
            cleaned: false,
        }
    }

    /// Returns the controller owning this container's group, if any.
    #[must_use]
    pub const fn controller(&self) -> Option<&ResourceController> {
        self.controller.as_ref()
    }

    /// Records the isolated process id.
    ///
    /// # Errors
    ///
    /// Returns an error if a pid was already attached.
    pub fn attach_pid(&mut self, pid: u32) -> Result<()> {
        if let Some(existing) = self.pid {
            return Err(MinidockError::Config {
                message: format!("container {} already has process {existing}", self.id),
            });
        }
        self.pid = Some(pid);
        tracing::debug!(id = %self.id, pid, "isolated process attached");
        Ok(())
    }

    /// Notes that the isolated process has been waited for.
    pub const fn mark_reaped(&mut self) {
        self.reaped = true;
    }

    /// Stops the isolated process if it may still run, then removes the group.
    ///
    /// Calling this again is a no-op.
    pub fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;

        if let (Some(pid), false) = (self.pid, self.reaped) {
            terminate(pid);
            self.reaped = true;
        }
        if let Some(controller) = &self.controller {
            controller.cleanup(&self.id);
        }
        tracing::info!(id = %self.id, "container resources cleaned");
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Sends `SIGTERM` and waits. A process that is already gone is fine.
fn terminate(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let pid = Pid::from_raw(raw);
    match kill(pid, Signal::SIGTERM) {
        Ok(()) => {
            tracing::info!(pid = raw, "sent SIGTERM to isolated process");
            match waitpid(pid, None) {
                Ok(_) | Err(Errno::ECHILD) => {}
                Err(e) => tracing::warn!(pid = raw, error = %e, "waiting for isolated process failed"),
            }
        }
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid = raw, error = %e, "failed to signal isolated process"),
    }
}
