//! `minidock stop`: tear down leftover container groups.
//!
//! A group outlives its container only if the runtime itself was killed.
//! This removes such groups, force-killing anything still inside them.

use std::process::ExitCode;

use anyhow::bail;
use clap::Args;
use minidock_common::config::MinidockConfig;
use minidock_common::error::MinidockError;
use minidock_common::types::ContainerId;

use crate::output::{GREEN, RESET};

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container IDs to tear down.
    pub containers: Vec<String>,

    /// Tear down every group under the minidock root.
    #[arg(short, long, conflicts_with = "containers")]
    pub all: bool,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if neither IDs nor `--all` are given, or
/// [`MinidockError::NotFound`] naming every ID that has no group. Known IDs
/// are still stopped in that case.
pub fn execute(args: &StopArgs, config: &MinidockConfig) -> anyhow::Result<ExitCode> {
    let controller = super::controller(config);
    let targets: Vec<ContainerId> = if args.all {
        controller.list_containers()
    } else if args.containers.is_empty() {
        bail!("name at least one container ID, or pass --all");
    } else {
        args.containers.iter().map(ContainerId::new).collect()
    };

    let known = controller.list_containers();
    let mut missing = Vec::new();
    for id in &targets {
        if !known.contains(id) {
            missing.push(id.as_str());
            continue;
        }
        tracing::info!(id = %id, "stopping container");
        controller.cleanup(id);
        eprintln!("  {GREEN}stopped{RESET} {id}");
    }

    if !missing.is_empty() {
        return Err(MinidockError::NotFound {
            kind: "container",
            id: missing.join(", "),
        }
        .into());
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use minidock_common::types::CgroupVersion;

    use super::*;

    fn config(root: &std::path::Path) -> MinidockConfig {
        MinidockConfig {
            cgroup_root: root.to_path_buf(),
            cgroup_version: CgroupVersion::V1,
            ..MinidockConfig::default()
        }
    }

    fn stop(ids: &[&str]) -> StopArgs {
        StopArgs {
            containers: ids.iter().map(ToString::to_string).collect(),
            all: false,
        }
    }

    #[test]
    fn known_container_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let controller = super::super::controller(&config);
        let _ = controller.create(&ContainerId::new("minidock-1")).unwrap();

        let _ = execute(&stop(&["minidock-1"]), &config).expect("stop");
        assert!(controller.list_containers().is_empty());
    }

    #[test]
    fn unknown_container_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let controller = super::super::controller(&config);
        let _ = controller.create(&ContainerId::new("minidock-1")).unwrap();

        let err = execute(&stop(&["minidock-1", "ghost"]), &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MinidockError>(),
            Some(MinidockError::NotFound { kind: "container", id }) if id == "ghost"
        ));
        assert!(controller.list_containers().is_empty());
    }

    #[test]
    fn stop_needs_a_target() {
        let dir = tempfile::tempdir().unwrap();
        assert!(execute(&stop(&[]), &config(dir.path())).is_err());
    }
}
