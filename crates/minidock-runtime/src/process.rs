//! Spawning the isolated process.
//!
//! The child is created with `std::process::Command` and a pre-exec hook
//! that, in order, unshares namespaces, privatises mounts, enters the rootfs,
//! sets the hostname and joins the cgroup. `exec` then resolves the command
//! inside the new root. The hook cannot log, so it reports each step that did
//! not succeed over a close-on-exec pipe and the parent logs the reports.

use std::ffi::OsString;
use std::fmt;
use std::io::Read;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use minidock_common::constants::{EXIT_COMMAND_NOT_FOUND, EXIT_FAILURE};
use minidock_core::cgroup::procs;
use minidock_core::filesystem::chroot;
use minidock_core::namespace::{self, NamespaceConfig};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::{getpid, pipe2};

use crate::container::ContainerSpec;

/// Size of one report record: step code plus a native-endian errno.
const RECORD_LEN: usize = 5;

/// Isolation steps run in the child, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SetupStep {
    /// `unshare(2)` of the PID, UTS and mount namespaces.
    Namespaces = 1,
    /// Recursive private remount of `/`.
    MountPropagation = 2,
    /// `chroot(2)` into the rootfs and `chdir("/")`.
    RootSwitch = 3,
    /// `sethostname(2)`.
    Hostname = 4,
    /// Writing the child's pid to `cgroup.procs`.
    CgroupAttach = 5,
}

impl SetupStep {
    const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Namespaces),
            2 => Some(Self::MountPropagation),
            3 => Some(Self::RootSwitch),
            4 => Some(Self::Hostname),
            5 => Some(Self::CgroupAttach),
            _ => None,
        }
    }

    /// Whether a failure of this step aborts the isolated process.
    #[must_use]
    pub const fn is_mandatory(self) -> bool {
        matches!(
            self,
            Self::Namespaces | Self::MountPropagation | Self::RootSwitch
        )
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Namespaces => "namespace creation",
            Self::MountPropagation => "mount propagation",
            Self::RootSwitch => "root switch",
            Self::Hostname => "hostname",
            Self::CgroupAttach => "cgroup attach",
        };
        f.write_str(name)
    }
}

/// A step that did not succeed in the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupReport {
    /// Which step failed.
    pub step: SetupStep,
    /// The errno it failed with.
    pub errno: Errno,
}

impl SetupReport {
    fn encode(step: SetupStep, errno: Errno) -> [u8; RECORD_LEN] {
        let code = (errno as i32).to_ne_bytes();
        [step as u8, code[0], code[1], code[2], code[3]]
    }

    fn decode_all(bytes: &[u8]) -> Vec<Self> {
        bytes
            .chunks_exact(RECORD_LEN)
            .filter_map(|record| {
                let step = SetupStep::from_code(record[0])?;
                let code = i32::from_ne_bytes([record[1], record[2], record[3], record[4]]);
                Some(Self {
                    step,
                    errno: Errno::from_raw(code),
                })
            })
            .collect()
    }
}

/// Why the isolated process never reached the target program.
#[derive(Debug)]
pub enum SpawnFailure {
    /// The command does not exist inside the rootfs.
    CommandNotFound {
        /// The command as given.
        command: String,
    },
    /// A mandatory isolation step failed.
    Setup {
        /// The step that failed.
        step: SetupStep,
        /// Its errno.
        errno: Errno,
    },
    /// Any other failure to create the process or exec the program.
    Exec(std::io::Error),
}

impl SpawnFailure {
    /// Exit status reported for this failure: 127 for a missing command, 1 otherwise.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::CommandNotFound { .. } => EXIT_COMMAND_NOT_FOUND,
            Self::Setup { .. } | Self::Exec(_) => EXIT_FAILURE,
        }
    }
}

impl fmt::Display for SpawnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandNotFound { command } => write!(f, "command not found: {command}"),
            Self::Setup { step, errno } => write!(f, "{step} failed: {errno}"),
            Self::Exec(e) => write!(f, "exec failed: {e}"),
        }
    }
}

/// A successfully started isolated process.
#[derive(Debug)]
pub struct IsolatedProcess {
    /// The running target program.
    pub child: Child,
    /// Best-effort steps that did not take effect.
    pub degraded: Vec<SetupReport>,
}

/// Everything the pre-exec hook needs, prepared before the fork.
#[derive(Debug)]
struct IsolationHook {
    namespaces: NamespaceConfig,
    rootfs: PathBuf,
    hostname: Option<OsString>,
    procs: Option<OwnedFd>,
    report: OwnedFd,
}

impl IsolationHook {
    /// Runs in the child between fork and exec. No allocation, no logging.
    fn run(&self) -> std::io::Result<()> {
        if let Err(errno) = namespace::unshare_namespaces(&self.namespaces) {
            return self.abort(SetupStep::Namespaces, errno);
        }
        if self.namespaces.mount {
            if let Err(errno) = namespace::mount::make_mounts_private() {
                return self.abort(SetupStep::MountPropagation, errno);
            }
        }
        if let Err(errno) = chroot::enter_root(&self.rootfs) {
            return self.abort(SetupStep::RootSwitch, errno);
        }
        if let Some(hostname) = &self.hostname {
            if let Err(errno) = namespace::uts::set_hostname(hostname) {
                self.report(SetupStep::Hostname, errno);
            }
        }
        // Opened before the fork: the host path is unreachable after the root switch.
        if let Some(procs) = &self.procs {
            let pid = getpid().as_raw().unsigned_abs();
            if let Err(errno) = procs::write_pid(procs, pid) {
                self.report(SetupStep::CgroupAttach, errno);
            }
        }
        Ok(())
    }

    fn report(&self, step: SetupStep, errno: Errno) {
        let record = SetupReport::encode(step, errno);
        let _ = nix::unistd::write(&self.report, &record);
    }

    fn abort(&self, step: SetupStep, errno: Errno) -> std::io::Result<()> {
        self.report(step, errno);
        Err(std::io::Error::from_raw_os_error(errno as i32))
    }
}

/// Forks the isolated process and execs the container command in it.
///
/// `procs_file` is the membership file of the container's cgroup, if one
/// was created. It is opened here, before the fork, and the child writes its
/// pid through that descriptor after entering the rootfs. Returns once the
/// target program is running or the child has failed.
///
/// # Errors
///
/// Returns a [`SpawnFailure`] if setup or exec failed in the child.
pub fn spawn_isolated(
    spec: &ContainerSpec,
    procs_file: Option<&Path>,
) -> Result<IsolatedProcess, SpawnFailure> {
    let (report_rx, report_tx) =
        pipe2(OFlag::O_CLOEXEC).map_err(|e| SpawnFailure::Exec(e.into()))?;

    let mut parent_reports = Vec::new();
    let procs = procs_file.and_then(|path| match procs::open_procs(path) {
        Ok(fd) => Some(fd),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "cannot open cgroup membership file");
            parent_reports.push(SetupReport {
                step: SetupStep::CgroupAttach,
                errno: Errno::from_raw(e.raw_os_error().unwrap_or(0)),
            });
            None
        }
    });

    let hook = IsolationHook {
        namespaces: NamespaceConfig::default(),
        rootfs: spec.rootfs.clone(),
        hostname: spec.hostname.clone().map(OsString::from),
        procs,
        report: report_tx,
    };

    let mut command = Command::new(&spec.command);
    let _ = command.args(&spec.args);
    // SAFETY: the hook only issues syscalls through nix with paths and
    // descriptors prepared before the fork, and writes fixed-size stack buffers.
    // It does not allocate, lock, or touch state shared with other threads.
    let _ = unsafe { command.pre_exec(move || hook.run()) };

    let spawned = command.spawn();
    // Dropping the command drops the hook and with it our copy of the write end.
    drop(command);
    let mut reports = parent_reports;
    reports.extend(read_reports(report_rx));

    for report in reports.iter().filter(|r| !r.step.is_mandatory()) {
        tracing::warn!(step = %report.step, errno = %report.errno, "isolation step degraded");
    }

    match spawned {
        Ok(child) => {
            tracing::info!(pid = child.id(), command = %spec.command, "isolated process started");
            Ok(IsolatedProcess {
                child,
                degraded: reports,
            })
        }
        Err(e) => Err(classify_failure(e, &reports, &spec.command)),
    }
}

fn read_reports(report_rx: OwnedFd) -> Vec<SetupReport> {
    let mut bytes = Vec::new();
    if let Err(e) = std::fs::File::from(report_rx).read_to_end(&mut bytes) {
        tracing::warn!(error = %e, "cannot read isolation report");
    }
    SetupReport::decode_all(&bytes)
}

fn classify_failure(err: std::io::Error, reports: &[SetupReport], command: &str) -> SpawnFailure {
    if let Some(report) = reports.iter().find(|r| r.step.is_mandatory()) {
        return SpawnFailure::Setup {
            step: report.step,
            errno: report.errno,
        };
    }
    if err.kind() == std::io::ErrorKind::NotFound {
        SpawnFailure::CommandNotFound {
            command: command.to_string(),
        }
    } else {
        SpawnFailure::Exec(err)
    }
}
