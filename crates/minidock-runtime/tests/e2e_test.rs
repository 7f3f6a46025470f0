//! End-to-end launches through the real isolation path.
//!
//! These need root (namespaces, `chroot`, cgroupfs). Most use the host `/`
//! as the rootfs so that `/bin/true` and friends exist; one builds a minimal
//! rootfs in a temporary directory. All skip themselves when the environment
//! cannot create namespaces.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic, clippy::print_stderr)]

use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use minidock_common::error::MinidockError;
use minidock_common::types::{CgroupVersion, ContainerId, ResourceLimits};
use minidock_core::cgroup::{ResourceController, procs};
use minidock_runtime::container::ContainerSpec;
use minidock_runtime::launcher::{ContainerLauncher, ContainerOutcome, LaunchOptions};
use minidock_runtime::process::{self, SetupStep, SpawnFailure};
use minidock_runtime::supervise;
use nix::errno::Errno;
use nix::sys::signal::kill;

fn run(spec: ContainerSpec) -> ContainerOutcome {
    let (_cancel, signal) = supervise::channel();
    ContainerLauncher::new(spec, None, LaunchOptions::default())
        .launch(signal)
        .expect("launch")
}

/// Whether this process may unshare namespaces and chroot.
fn isolation_available() -> bool {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("skipping: end-to-end launches need root");
        return false;
    }
    match run(ContainerSpec::new("/", "/bin/true")) {
        ContainerOutcome::SpawnFailed(SpawnFailure::Setup { step, errno }) => {
            eprintln!("skipping: {step} unavailable ({errno})");
            false
        }
        _ => true,
    }
}

#[test]
fn true_exits_zero() {
    if !isolation_available() {
        return;
    }
    let outcome = run(ContainerSpec::new("/", "/bin/true").hostname("e2e"));
    assert_eq!(outcome.exit_code(), 0);
}

#[test]
fn false_exits_one() {
    if !isolation_available() {
        return;
    }
    let outcome = run(ContainerSpec::new("/", "/bin/false"));
    assert!(matches!(outcome, ContainerOutcome::Exited(1)));
}

#[test]
fn program_exit_code_is_passed_through() {
    if !isolation_available() {
        return;
    }
    let outcome = run(ContainerSpec::new("/", "sh").args(["-c", "exit 42"]));
    assert_eq!(outcome.exit_code(), 42);
}

#[test]
fn missing_binary_exits_127() {
    if !isolation_available() {
        return;
    }
    let outcome = run(ContainerSpec::new("/", "/nonexistent-binary"));
    assert!(matches!(
        outcome,
        ContainerOutcome::SpawnFailed(SpawnFailure::CommandNotFound { .. })
    ));
    assert_eq!(outcome.exit_code(), 127);
}

#[test]
fn cancellation_leaves_no_group_behind() {
    if !isolation_available() {
        return;
    }
    let controller = ResourceController::new("/sys/fs/cgroup", "minidock-e2e", CgroupVersion::Auto);
    let spec = ContainerSpec::new("/", "/bin/sleep").args(["30"]).limits(ResourceLimits {
        memory_bytes: Some(64 * 1024 * 1024),
        cpu_cores: Some(0.5),
    });
    let options = LaunchOptions {
        strict_limits: false,
        stop_timeout: Duration::from_secs(2),
    };

    let (cancel, signal) = supervise::channel();
    let watched = controller.clone();
    let canceller = std::thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut members = Vec::new();
        while members.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
            if let Some(id) = watched.list_containers().first() {
                members = procs::read_pids(&watched.procs_path(id)).unwrap_or_default();
            }
        }
        cancel.cancel();
        members
    });
    let outcome = ContainerLauncher::new(spec, Some(controller.clone()), options)
        .launch(signal)
        .expect("launch");
    let members = canceller.join().unwrap();

    assert!(matches!(outcome, ContainerOutcome::Cancelled));
    assert_eq!(outcome.exit_code(), 0);
    assert!(controller.list_containers().is_empty());
    for pid in members {
        assert_eq!(kill(pid, None), Err(Errno::ESRCH), "member {pid} survived");
    }
}

/// Copies `binary` and the shared libraries `ldd` reports into `root`.
///
/// Returns `false` when `ldd` is unavailable.
fn install_with_libraries(binary: &Path, root: &Path) -> bool {
    let Ok(output) = Command::new("ldd").arg(binary).output() else {
        return false;
    };
    let listing = String::from_utf8_lossy(&output.stdout);
    let libraries = listing
        .split_whitespace()
        .filter(|token| token.starts_with('/'))
        .map(Path::new);
    for file in std::iter::once(binary).chain(libraries) {
        let target = root.join(file.strip_prefix("/").unwrap());
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        let _ = std::fs::copy(file, &target).unwrap();
    }
    true
}

#[test]
fn process_joins_its_group_inside_a_private_rootfs() {
    if !isolation_available() {
        return;
    }
    let rootfs = tempfile::tempdir().unwrap();
    if !install_with_libraries(Path::new("/bin/sleep"), rootfs.path()) {
        eprintln!("skipping: ldd is unavailable");
        return;
    }
    let cgroups = tempfile::tempdir().unwrap();
    let controller = ResourceController::new(cgroups.path(), "minidock-e2e", CgroupVersion::V1);
    let id = ContainerId::generate();
    let _ = controller.create(&id).unwrap();
    let procs_file = controller.procs_path(&id);
    std::fs::write(&procs_file, "").unwrap();

    let spec = ContainerSpec::new(rootfs.path(), "/bin/sleep").args(["5"]);
    let mut spawned = process::spawn_isolated(&spec, Some(&procs_file)).expect("spawn");
    let pid = spawned.child.id();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut members = Vec::new();
    while members.is_empty() && Instant::now() < deadline {
        members = procs::read_pids(&procs_file).unwrap();
        std::thread::sleep(Duration::from_millis(20));
    }
    let running = spawned.child.try_wait().unwrap().is_none();
    spawned.child.kill().unwrap();
    let _ = spawned.child.wait().unwrap();

    assert!(running, "sleep exited early");
    let expected = i32::try_from(pid).unwrap();
    assert_eq!(members.iter().map(|p| p.as_raw()).collect::<Vec<_>>(), vec![expected]);
    assert!(spawned.degraded.iter().all(|r| r.step != SetupStep::CgroupAttach));
}

#[test]
fn invalid_rootfs_is_rejected_without_root() {
    let (_cancel, signal) = supervise::channel();
    let result = ContainerLauncher::new(
        ContainerSpec::new("/nonexistent/rootfs", "/bin/true"),
        None,
        LaunchOptions::default(),
    )
    .launch(signal);
    assert!(matches!(result, Err(MinidockError::Validation { .. })));
}
