//! The container launch state machine.
//!
//! `Created -> Split -> Supervising -> Cleaned`. A launcher is consumed by
//! [`ContainerLauncher::launch`], so there is exactly one forward path and
//! cleanup runs on all of them.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use minidock_common::config::MinidockConfig;
use minidock_common::constants::{DEFAULT_STOP_TIMEOUT_SECS, EXIT_FAILURE, EXIT_SIGNAL_BASE};
use minidock_common::error::{MinidockError, Result};
use minidock_common::types::{ContainerId, Outcome};
use minidock_core::cgroup::ResourceController;

use crate::container::{ContainerHandle, ContainerSpec};
use crate::process::{self, IsolatedProcess, SetupStep, SpawnFailure};
use crate::supervise::{self, CancelSignal, Supervision};

/// Knobs that change how a launch reacts, not what it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Abort the launch if any requested limit is not applied.
    pub strict_limits: bool,
    /// Grace period between `SIGTERM` and the forced kill after cancellation.
    pub stop_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            strict_limits: false,
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
        }
    }
}

impl LaunchOptions {
    /// Takes the launch knobs from the runtime configuration.
    #[must_use]
    pub const fn from_config(config: &MinidockConfig) -> Self {
        Self {
            strict_limits: config.strict_limits,
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// How a container run ended.
#[derive(Debug)]
pub enum ContainerOutcome {
    /// The program exited with this status code.
    Exited(i32),
    /// The program was killed by this signal.
    Signaled(i32),
    /// The program never started.
    SpawnFailed(SpawnFailure),
    /// The operator stopped the container.
    Cancelled,
}

impl ContainerOutcome {
    /// Status the runtime itself should exit with.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(signal) => EXIT_SIGNAL_BASE + *signal,
            Self::SpawnFailed(failure) => failure.exit_code(),
            Self::Cancelled => 0,
        }
    }

    /// Whether the run counts as successful.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code() == 0
    }

    fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(signal)) => Self::Signaled(signal),
            (None, None) => Self::Exited(EXIT_FAILURE),
        }
    }
}

/// Runs one [`ContainerSpec`] to completion.
#[derive(Debug)]
pub struct ContainerLauncher {
    spec: ContainerSpec,
    controller: Option<ResourceController>,
    options: LaunchOptions,
}

impl ContainerLauncher {
    /// Creates a launcher. Without a `controller`, limits cannot be enforced.
    #[must_use]
    pub const fn new(
        spec: ContainerSpec,
        controller: Option<ResourceController>,
        options: LaunchOptions,
    ) -> Self {
        Self {
            spec,
            controller,
            options,
        }
    }

    /// Launches the container and blocks until it exits or is cancelled.
    ///
    /// A program that fails to start is an ordinary outcome, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`MinidockError::Validation`] for a bad container spec (nothing is
    /// created), [`MinidockError::ResourceLimit`] when strict limits cannot be
    /// honoured, and [`MinidockError::Supervision`] if the isolated process
    /// is lost. The group is cleaned up in every case.
    pub fn launch(self, cancel: CancelSignal) -> Result<ContainerOutcome> {
        self.spec.validate()?;

        let id = ContainerId::generate();
        tracing::info!(
            id = %id,
            command = %self.spec.command,
            rootfs = %self.spec.rootfs.display(),
            "launching container"
        );

        let mut handle = self.prepare_group(&id)?;
        let procs_file = handle.controller().map(|c| c.procs_path(&id));

        let mut spawned = match process::spawn_isolated(&self.spec, procs_file.as_deref()) {
            Ok(spawned) => spawned,
            Err(failure) => {
                tracing::error!(id = %id, error = %failure, "container failed to start");
                handle.cleanup();
                return Ok(ContainerOutcome::SpawnFailed(failure));
            }
        };
        handle.attach_pid(spawned.child.id())?;
        self.require_attach(&mut spawned, &mut handle)?;

        let backstop = handle.controller().cloned();
        let backstop_id = id.clone();
        let supervised = supervise::supervise(spawned.child, cancel, self.options.stop_timeout, move || {
            if let Some(controller) = backstop {
                let killed = controller.kill_members(&backstop_id);
                tracing::warn!(id = %backstop_id, killed, "force-killed container group");
            }
        });
        if supervised.is_ok() {
            handle.mark_reaped();
        }
        handle.cleanup();

        let outcome = match supervised? {
            Supervision::Exited(status) => ContainerOutcome::from_status(status),
            Supervision::Cancelled(_) => ContainerOutcome::Cancelled,
        };
        tracing::info!(id = %id, exit_code = outcome.exit_code(), "container finished");
        Ok(outcome)
    }

    /// Creates and programs the container's group when limits are requested.
    fn prepare_group(&self, id: &ContainerId) -> Result<ContainerHandle> {
        let strict = self.options.strict_limits;
        let unconfined = || ContainerHandle::new(id.clone(), None);

        let Some(limits) = self.spec.resource_limits.filter(|l| l.requests_group()) else {
            return Ok(unconfined());
        };
        let Some(controller) = &self.controller else {
            let reason = "no resource controller available".to_string();
            if strict {
                return Err(MinidockError::ResourceLimit {
                    capability: "cgroup",
                    reason,
                });
            }
            tracing::warn!(id = %id, reason = %reason, "running without resource limits");
            return Ok(unconfined());
        };

        let handle = ContainerHandle::new(id.clone(), Some(controller.clone()));
        if let Err(e) = controller.ensure_root_group().and_then(|_| controller.create(id)) {
            if strict {
                return Err(MinidockError::ResourceLimit {
                    capability: "cgroup",
                    reason: e.to_string(),
                });
            }
            tracing::warn!(id = %id, error = %e, "cannot create cgroup, running without resource limits");
            drop(handle);
            return Ok(unconfined());
        }

        if let Some(bytes) = limits.memory_bytes {
            require(controller.set_memory_limit(id, bytes), "memory", strict)?;
        }
        if let Some(cores) = limits.cpu_cores {
            require(controller.set_cpu_limit(id, cores), "cpu", strict)?;
        }
        Ok(handle)
    }

    /// With strict limits, a process that did not join its group is stopped
    /// before it can run unconfined.
    fn require_attach(&self, spawned: &mut IsolatedProcess, handle: &mut ContainerHandle) -> Result<()> {
        if !self.options.strict_limits || handle.controller().is_none() {
            return Ok(());
        }
        let Some(report) = spawned
            .degraded
            .iter()
            .find(|r| r.step == SetupStep::CgroupAttach)
        else {
            return Ok(());
        };
        let reason = format!("isolated process did not join its cgroup: {}", report.errno);

        if let Err(e) = spawned.child.kill() {
            tracing::warn!(error = %e, "failed to kill unconfined process");
        }
        match spawned.child.wait() {
            Ok(_) => handle.mark_reaped(),
            Err(e) => tracing::warn!(error = %e, "failed to reap unconfined process"),
        }
        handle.cleanup();
        Err(MinidockError::ResourceLimit {
            capability: "cgroup",
            reason,
        })
    }
}

/// Turns a non-applied limit into an error when limits are strict.
fn require(outcome: Outcome, capability: &'static str, strict: bool) -> Result<()> {
    match outcome {
        Outcome::Degraded { reason } | Outcome::Fatal { reason } if strict => {
            Err(MinidockError::ResourceLimit { capability, reason })
        }
        _ => Ok(()),
    }
}
