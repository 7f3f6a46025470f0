//! CLI command definitions and dispatch.

pub mod ps;
pub mod run;
pub mod stop;
pub mod version;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use minidock_common::config::MinidockConfig;
use minidock_common::types::CgroupVersion;
use minidock_core::cgroup::ResourceController;

/// minidock: run one command in an isolated, resource-limited container.
#[derive(Parser, Debug)]
#[command(name = "minidock", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file.
    #[arg(long, global = true, env = "MINIDOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Mount point of the cgroup filesystem.
    #[arg(long, global = true, env = "MINIDOCK_CGROUP_ROOT")]
    pub cgroup_root: Option<PathBuf>,

    /// Group holding one directory per container.
    #[arg(long, global = true, env = "MINIDOCK_CGROUP_GROUP")]
    pub cgroup_group: Option<String>,

    /// Cgroup control-file layout: auto, v1 or v2.
    #[arg(long, global = true, env = "MINIDOCK_CGROUP_VERSION")]
    pub cgroup_version: Option<CgroupVersion>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// How log events are rendered on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command in a new container.
    Run(run::RunArgs),
    /// List container groups and their resource usage.
    Ps(ps::PsArgs),
    /// Tear down leftover container groups.
    Stop(stop::StopArgs),
    /// Print the version.
    Version,
}

impl Cli {
    /// Builds the effective configuration: defaults, then the file, then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be loaded or the
    /// result is invalid.
    pub fn resolve_config(&self) -> anyhow::Result<MinidockConfig> {
        let mut config = match &self.config {
            Some(path) => MinidockConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => MinidockConfig::default(),
        };
        if let Some(root) = &self.cgroup_root {
            config.cgroup_root.clone_from(root);
        }
        if let Some(group) = &self.cgroup_group {
            config.group_name.clone_from(group);
        }
        if let Some(version) = self.cgroup_version {
            config.cgroup_version = version;
        }
        config.validate().context("invalid configuration")?;
        tracing::debug!(?config, "configuration resolved");
        Ok(config)
    }
}

/// Builds the controller for the configured cgroup hierarchy.
pub fn controller(config: &MinidockConfig) -> ResourceController {
    ResourceController::from_config(config)
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command cannot be carried out.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    if matches!(cli.command, Command::Version) {
        version::execute();
        return Ok(ExitCode::SUCCESS);
    }
    let config = cli.resolve_config()?;
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Ps(args) => ps::execute(&args, &config),
        Command::Stop(args) => stop::execute(&args, &config),
        Command::Version => Ok(ExitCode::SUCCESS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_passes_trailing_arguments_verbatim() {
        let cli = Cli::try_parse_from([
            "minidock", "run", "-m", "100M", "--cpus", "0.5", "/bin/sh", "-c", "echo hi",
        ])
        .expect("parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.memory.as_deref(), Some("100M"));
        assert_eq!(args.cpus, Some(0.5));
        assert_eq!(args.command, vec!["/bin/sh", "-c", "echo hi"]);
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("minidock.json");
        std::fs::write(&file, r#"{"group_name": "from-file", "stop_timeout_secs": 3}"#).unwrap();

        let cli = Cli::try_parse_from([
            "minidock",
            "--config",
            file.to_str().unwrap(),
            "--cgroup-group",
            "from-flag",
            "--cgroup-version",
            "v2",
            "ps",
        ])
        .expect("parse");
        let config = cli.resolve_config().expect("config");
        assert_eq!(config.group_name, "from-flag");
        assert_eq!(config.cgroup_version, CgroupVersion::V2);
        assert_eq!(config.stop_timeout_secs, 3);
    }

    #[test]
    fn unknown_cgroup_version_is_rejected() {
        assert!(Cli::try_parse_from(["minidock", "--cgroup-version", "v3", "ps"]).is_err());
    }

    #[test]
    fn group_with_slash_is_rejected() {
        let cli = Cli::try_parse_from(["minidock", "--cgroup-group", "a/b", "ps"]).expect("parse");
        assert!(cli.resolve_config().is_err());
    }
}
