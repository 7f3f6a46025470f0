//! Per-container cgroup management.
//!
//! Every container gets `<root>/<group>/<container_id>`. Limits, accounting
//! and membership are plain file reads and writes against that directory.
//! Resource limiting is an enhancement: limit writes report an [`Outcome`]
//! instead of failing, and teardown never fails at all.

pub mod cpu;
pub mod memory;
pub mod procs;
pub mod protocol;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use minidock_common::config::MinidockConfig;
use minidock_common::error::{MinidockError, Result};
use minidock_common::types::{CgroupVersion, ContainerId, Outcome};
use nix::errno::Errno;
use serde::Serialize;

use self::protocol::ControlFiles;

/// How many times `rmdir` is retried while the kernel still reports members.
const RMDIR_ATTEMPTS: u32 = 20;
/// Pause between `rmdir` attempts.
const RMDIR_BACKOFF: Duration = Duration::from_millis(50);

/// Accounting snapshot for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceUsage {
    /// Container the snapshot belongs to.
    pub container_id: ContainerId,
    /// Current memory usage in bytes, if readable.
    pub memory_bytes: Option<u64>,
    /// CPU accounting counters, if readable.
    pub cpu: Option<BTreeMap<String, u64>>,
}

/// Owns the fixed-root hierarchy of per-container groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceController {
    root: PathBuf,
    group_name: String,
    version: CgroupVersion,
}

impl ResourceController {
    /// Creates a controller for `<root>/<group_name>`.
    ///
    /// `CgroupVersion::Auto` is resolved here by probing `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, group_name: impl Into<String>, version: CgroupVersion) -> Self {
        let root = root.into();
        let version = protocol::resolve_version(version, &root);
        Self {
            root,
            group_name: group_name.into(),
            version,
        }
    }

    /// Creates a controller from the runtime configuration.
    #[must_use]
    pub fn from_config(config: &MinidockConfig) -> Self {
        Self::new(
            config.cgroup_root.clone(),
            config.group_name.clone(),
            config.cgroup_version,
        )
    }

    /// Returns the resolved protocol version (never `Auto`).
    #[must_use]
    pub const fn version(&self) -> CgroupVersion {
        self.version
    }

    /// Returns the control-file names for this controller's protocol.
    #[must_use]
    pub const fn files(&self) -> &'static ControlFiles {
        protocol::control_files(self.version)
    }

    /// Returns `<root>/<group>`.
    #[must_use]
    pub fn group_root(&self) -> PathBuf {
        self.root.join(&self.group_name)
    }

    /// Returns `<root>/<group>/<container_id>`.
    #[must_use]
    pub fn group_path(&self, id: &ContainerId) -> PathBuf {
        self.group_root().join(id.as_str())
    }

    /// Returns the membership file of a container's group.
    #[must_use]
    pub fn procs_path(&self, id: &ContainerId) -> PathBuf {
        self.group_path(id).join(self.files().procs)
    }

    /// Creates the top-level group if it does not exist yet.
    ///
    /// On v2 the `cpu` and `memory` controllers are also delegated from the
    /// root into the group, so that per-container limit files appear.
    ///
    /// # Errors
    ///
    /// Returns an error if the group directory cannot be created.
    pub fn ensure_root_group(&self) -> Result<PathBuf> {
        let path = self.group_root();
        if !path.is_dir() {
            std::fs::create_dir_all(&path).map_err(|e| MinidockError::Io {
                path: path.clone(),
                source: e,
            })?;
            tracing::info!(path = %path.display(), "cgroup root group created");
        }
        if self.version == CgroupVersion::V2 {
            enable_controllers(&self.root);
            enable_controllers(&path);
        }
        Ok(path)
    }

    /// Creates the group for one container, including missing parents.
    ///
    /// Creating a group that already exists is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create(&self, id: &ContainerId) -> Result<PathBuf> {
        let path = self.group_path(id);
        std::fs::create_dir_all(&path).map_err(|e| MinidockError::Io {
            path: path.clone(),
            source: e,
        })?;
        tracing::info!(id = %id, path = %path.display(), "cgroup created");
        Ok(path)
    }

    /// Writes the memory limit in bytes.
    pub fn set_memory_limit(&self, id: &ContainerId, bytes: u64) -> Outcome {
        let result = memory::set_memory_limit(&self.group_path(id), self.files().memory_limit, bytes);
        let outcome = outcome_of(result);
        log_outcome(id, "memory", &outcome);
        if outcome.is_applied() {
            tracing::info!(id = %id, bytes, "memory limit set");
        }
        outcome
    }

    /// Writes a CPU bandwidth limit of `cores` using the fixed 100 ms period.
    pub fn set_cpu_limit(&self, id: &ContainerId, cores: f64) -> Outcome {
        let outcome = match cpu::cfs_quota(cores) {
            Some(quota) => outcome_of(cpu::set_cpu_quota(
                &self.group_path(id),
                self.files().cpu,
                quota,
                minidock_common::constants::CPU_PERIOD_US,
            )),
            None => Outcome::Fatal {
                reason: format!("CPU limit must be a positive number of cores, got {cores}"),
            },
        };
        log_outcome(id, "cpu", &outcome);
        if outcome.is_applied() {
            tracing::info!(id = %id, cores, "CPU limit set");
        }
        outcome
    }

    /// Joins `pid` (and, on a real kernel, its future children) to the group.
    pub fn add_process(&self, id: &ContainerId, pid: u32) -> Outcome {
        let path = self.procs_path(id);
        let outcome = match procs::open_procs(&path)
            .and_then(|fd| procs::write_pid(&fd, pid).map_err(std::io::Error::from))
        {
            Ok(()) => Outcome::Applied,
            Err(e) => Outcome::from_io_error(&e),
        };
        log_outcome(id, "membership", &outcome);
        if outcome.is_applied() {
            tracing::debug!(id = %id, pid, "added process to cgroup");
        }
        outcome
    }

    /// Current memory usage in bytes; `None` if unavailable.
    #[must_use]
    pub fn memory_usage(&self, id: &ContainerId) -> Option<u64> {
        memory::read_memory_usage(&self.group_path(id), self.files().memory_usage)
    }

    /// CPU accounting counters; `None` if unavailable or malformed.
    #[must_use]
    pub fn cpu_usage(&self, id: &ContainerId) -> Option<BTreeMap<String, u64>> {
        let raw = std::fs::read_to_string(self.group_path(id).join(self.files().cpu_stat)).ok()?;
        parse_stat(&raw)
    }

    /// Memory and CPU accounting together.
    #[must_use]
    pub fn usage(&self, id: &ContainerId) -> ResourceUsage {
        ResourceUsage {
            container_id: id.clone(),
            memory_bytes: self.memory_usage(id),
            cpu: self.cpu_usage(id),
        }
    }

    /// Force-kills every process listed in the group's membership file.
    ///
    /// Returns how many processes were signalled. A missing group counts as
    /// zero members.
    pub fn kill_members(&self, id: &ContainerId) -> usize {
        match procs::read_pids(&self.procs_path(id)) {
            Ok(pids) => procs::kill_all(&pids),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "cannot read cgroup members");
                0
            }
        }
    }

    /// Tears down a container's group: kills its members, removes the directory.
    ///
    /// Best effort. Failures are logged, and a group that is already gone is
    /// fine.
    pub fn cleanup(&self, id: &ContainerId) {
        let path = self.group_path(id);
        let killed = self.kill_members(id);
        if killed > 0 {
            tracing::warn!(id = %id, killed, "force-killed remaining cgroup members");
        }
        match remove_group_dir(&path) {
            Ok(true) => tracing::info!(id = %id, "cgroup cleaned"),
            Ok(false) => tracing::debug!(id = %id, "cgroup already removed"),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::warn!(id = %id, error = %e, "insufficient permissions to remove cgroup");
            }
            Err(e) => tracing::error!(id = %id, error = %e, "failed to remove cgroup"),
        }
    }

    /// Names of all container groups under the top-level group, sorted.
    #[must_use]
    pub fn list_containers(&self) -> Vec<ContainerId> {
        let root = self.group_root();
        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %root.display(), error = %e, "cannot list cgroups");
                return Vec::new();
            }
        };
        let mut ids: Vec<ContainerId> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .map(ContainerId::new)
            .collect();
        ids.sort();
        ids
    }
}

fn outcome_of(result: Result<()>) -> Outcome {
    match result {
        Ok(()) => Outcome::Applied,
        Err(MinidockError::Io { source, .. }) => Outcome::from_io_error(&source),
        Err(other) => Outcome::Fatal {
            reason: other.to_string(),
        },
    }
}

fn log_outcome(id: &ContainerId, capability: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Applied => {}
        Outcome::Degraded { reason } => {
            tracing::warn!(id = %id, capability, reason = %reason, "cgroup setting degraded");
        }
        Outcome::Fatal { reason } => {
            tracing::error!(id = %id, capability, reason = %reason, "cgroup setting failed");
        }
    }
}

/// Parses `key value` lines. Blank lines are skipped; anything else malformed
/// invalidates the whole file.
fn parse_stat(raw: &str) -> Option<BTreeMap<String, u64>> {
    let mut stats = BTreeMap::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value), None) = (fields.next(), fields.next(), fields.next()) else {
            return None;
        };
        let _ = stats.insert(key.to_string(), value.parse().ok()?);
    }
    Some(stats)
}

fn enable_controllers(parent: &Path) {
    let file = parent.join("cgroup.subtree_control");
    if let Err(e) = std::fs::write(&file, protocol::V2_CONTROLLERS) {
        tracing::debug!(path = %file.display(), error = %e, "cannot delegate cgroup controllers");
    }
}

/// Removes a group directory. Returns `Ok(false)` if it did not exist.
///
/// A cgroupfs directory only accepts `rmdir` and refuses it while members
/// are still exiting; an ordinary directory needs recursive removal.
fn remove_group_dir(path: &Path) -> std::io::Result<bool> {
    let mut attempt = 1;
    loop {
        match std::fs::remove_dir(path) {
            Ok(()) => return Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) if e.raw_os_error() == Some(Errno::EBUSY as i32) && attempt < RMDIR_ATTEMPTS => {
                attempt += 1;
                std::thread::sleep(RMDIR_BACKOFF);
            }
            Err(e) if e.raw_os_error() == Some(Errno::ENOTEMPTY as i32) => {
                std::fs::remove_dir_all(path)?;
                return Ok(true);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(root: &Path) -> ResourceController {
        ResourceController::new(root, "minidock", CgroupVersion::V1)
    }

    fn read(path: PathBuf) -> String {
        std::fs::read_to_string(path).expect("control file")
    }

    #[test]
    fn create_then_list_includes_container() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new("minidock-1");

        let path = ctl.create(&id).expect("create");
        assert_eq!(path, dir.path().join("minidock").join("minidock-1"));
        assert_eq!(ctl.list_containers(), vec![id]);
    }

    #[test]
    fn create_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new("again");
        let _ = ctl.create(&id).expect("first create");
        let _ = ctl.create(&id).expect("second create");
        assert_eq!(ctl.list_containers().len(), 1);
    }

    #[test]
    fn ensure_root_group_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let first = ctl.ensure_root_group().expect("first");
        let second = ctl.ensure_root_group().expect("second");
        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[test]
    fn list_is_empty_without_root_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(controller(dir.path()).list_containers().is_empty());
    }

    #[test]
    fn list_ignores_plain_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let root = ctl.ensure_root_group().expect("root group");
        std::fs::write(root.join("cgroup.procs"), "").unwrap();
        let _ = ctl.create(&ContainerId::new("b")).unwrap();
        let _ = ctl.create(&ContainerId::new("a")).unwrap();
        assert_eq!(
            ctl.list_containers(),
            vec![ContainerId::new("a"), ContainerId::new("b")]
        );
    }

    #[test]
    fn cleanup_removes_group_from_listing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new("gone");
        let _ = ctl.create(&id).unwrap();
        assert_eq!(ctl.set_memory_limit(&id, 1024), Outcome::Applied);

        ctl.cleanup(&id);
        assert!(!ctl.list_containers().contains(&id));
        assert!(!ctl.group_path(&id).exists());
    }

    #[test]
    fn cleanup_of_missing_group_leaves_others_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let keep = ContainerId::new("keep");
        let _ = ctl.create(&keep).unwrap();

        ctl.cleanup(&ContainerId::new("never-created"));
        assert_eq!(ctl.list_containers(), vec![keep]);
    }

    #[test]
    fn cleanup_kills_listed_members() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new("busy");
        let _ = ctl.create(&id).unwrap();

        let mut child = std::process::Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        std::fs::write(ctl.procs_path(&id), format!("{}\n", child.id())).unwrap();

        ctl.cleanup(&id);
        let status = child.wait().expect("wait");
        assert!(!status.success());
        assert!(!ctl.group_path(&id).exists());
    }

    #[test]
    fn cpu_limit_writes_quota_and_period() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new("cpu");
        let group = ctl.create(&id).unwrap();

        assert_eq!(ctl.set_cpu_limit(&id, 0.5), Outcome::Applied);
        assert_eq!(read(group.join("cpu.cfs_quota_us")), "50000");
        assert_eq!(read(group.join("cpu.cfs_period_us")), "100000");

        assert_eq!(ctl.set_cpu_limit(&id, 2.0), Outcome::Applied);
        assert_eq!(read(group.join("cpu.cfs_quota_us")), "200000");
    }

    #[test]
    fn cpu_limit_rejects_zero_cores_without_writing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new("cpu-zero");
        let group = ctl.create(&id).unwrap();

        assert!(matches!(ctl.set_cpu_limit(&id, 0.0), Outcome::Fatal { .. }));
        assert!(!group.join("cpu.cfs_quota_us").exists());
    }

    #[test]
    fn v2_cpu_limit_uses_cpu_max() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = ResourceController::new(dir.path(), "minidock", CgroupVersion::V2);
        let id = ContainerId::new("v2");
        let _ = ctl.ensure_root_group().unwrap();
        let group = ctl.create(&id).unwrap();

        assert_eq!(ctl.set_cpu_limit(&id, 1.5), Outcome::Applied);
        assert_eq!(read(group.join("cpu.max")), "150000 100000");
        assert_eq!(read(dir.path().join("cgroup.subtree_control")), "+cpu +memory");
    }

    #[test]
    fn memory_limit_writes_exact_decimal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new("mem");
        let group = ctl.create(&id).unwrap();

        assert_eq!(ctl.set_memory_limit(&id, 104_857_600), Outcome::Applied);
        assert_eq!(read(group.join("memory.limit_in_bytes")), "104857600");
    }

    #[test]
    fn limits_on_missing_group_degrade() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new("missing");

        assert!(matches!(ctl.set_memory_limit(&id, 1), Outcome::Degraded { .. }));
        assert!(matches!(ctl.set_cpu_limit(&id, 1.0), Outcome::Degraded { .. }));
        assert!(matches!(ctl.add_process(&id, 1), Outcome::Degraded { .. }));
    }

    #[test]
    fn add_process_writes_decimal_pid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new("member");
        let _ = ctl.create(&id).unwrap();
        std::fs::write(ctl.procs_path(&id), "").unwrap();

        assert_eq!(ctl.add_process(&id, 31337), Outcome::Applied);
        assert_eq!(read(ctl.procs_path(&id)), "31337");
    }

    #[test]
    fn usage_reads_are_absent_without_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new("nothing");
        assert_eq!(ctl.memory_usage(&id), None);
        assert_eq!(ctl.cpu_usage(&id), None);
    }

    #[test]
    fn usage_reads_accounting_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new("acct");
        let group = ctl.create(&id).unwrap();
        std::fs::write(group.join("memory.usage_in_bytes"), "8192\n").unwrap();
        std::fs::write(group.join("cpuacct.stat"), "user 120\nsystem 30\n").unwrap();

        let usage = ctl.usage(&id);
        assert_eq!(usage.memory_bytes, Some(8192));
        let cpu = usage.cpu.expect("cpu stats");
        assert_eq!(cpu.get("user"), Some(&120));
        assert_eq!(cpu.get("system"), Some(&30));
    }

    #[test]
    fn malformed_stat_line_yields_none() {
        assert_eq!(parse_stat("user 1\nsystem\n"), None);
        assert_eq!(parse_stat("user one\n"), None);
        assert_eq!(parse_stat("user 1 2\n"), None);
        assert_eq!(parse_stat("\n").map(|m| m.len()), Some(0));
    }

    #[test]
    fn auto_version_is_resolved_on_construction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = ResourceController::new(dir.path(), "minidock", CgroupVersion::Auto);
        assert_eq!(ctl.version(), CgroupVersion::V1);
    }
}
