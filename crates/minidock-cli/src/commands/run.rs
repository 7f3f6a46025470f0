//! `minidock run`: run one command in a new container.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use minidock_common::config::MinidockConfig;
use minidock_common::types::ResourceLimits;
use minidock_runtime::container::ContainerSpec;
use minidock_runtime::launcher::{ContainerLauncher, ContainerOutcome, LaunchOptions};
use minidock_runtime::supervise;

use crate::output::{BOLD, DIM, GREEN, RED, RESET, YELLOW, format_bytes};
use crate::units::parse_memory;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Memory limit, e.g. `100M` or `1G`.
    #[arg(short, long)]
    pub memory: Option<String>,

    /// CPU limit in cores, fractions allowed.
    #[arg(short, long)]
    pub cpus: Option<f64>,

    /// Directory to use as the container's root [default: ./rootfs/alpine].
    #[arg(long)]
    pub rootfs: Option<PathBuf>,

    /// Hostname inside the container.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Network mode. Only `none` is supported; the host network is shared.
    #[arg(long, default_value = "none")]
    pub network: String,

    /// Refuse to run if a requested limit cannot be applied.
    #[arg(long)]
    pub strict_limits: bool,

    /// Seconds to wait after SIGTERM before killing a cancelled container.
    #[arg(long)]
    pub stop_timeout: Option<u64>,

    /// Command to run followed by its arguments, passed through verbatim.
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Memory and CPU limits from the flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory size cannot be parsed.
    pub fn limits(&self) -> anyhow::Result<ResourceLimits> {
        let memory_bytes = self.memory.as_deref().map(parse_memory).transpose()?;
        Ok(ResourceLimits {
            memory_bytes,
            cpu_cores: self.cpus,
        })
    }

    /// Builds the container spec, taking unset values from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if no command is given or the limits are malformed.
    pub fn spec(&self, config: &MinidockConfig) -> anyhow::Result<ContainerSpec> {
        let (command, args) = self
            .command
            .split_first()
            .context("no command given")?;
        let rootfs = self
            .rootfs
            .clone()
            .unwrap_or_else(|| config.default_rootfs.clone());

        let mut spec = ContainerSpec::new(rootfs, command.clone()).args(args.iter().cloned());
        if let Some(hostname) = &self.hostname {
            spec = spec.hostname(hostname.clone());
        }
        let limits = self.limits()?;
        if limits.requests_group() {
            spec = spec.limits(limits);
        }
        Ok(spec)
    }

    /// Launch options from the configuration, overridden by flags.
    #[must_use]
    pub fn options(&self, config: &MinidockConfig) -> LaunchOptions {
        let mut options = LaunchOptions::from_config(config);
        options.strict_limits |= self.strict_limits;
        if let Some(secs) = self.stop_timeout {
            options.stop_timeout = Duration::from_secs(secs);
        }
        options
    }
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if the arguments are invalid, the container spec is rejected, or
/// the container cannot be supervised.
pub fn execute(args: RunArgs, config: MinidockConfig) -> anyhow::Result<ExitCode> {
    let spec = args.spec(&config)?;
    let options = args.options(&config);
    if args.network != "none" {
        tracing::warn!(network = %args.network, "network modes are not supported, sharing the host network");
    }

    let controller = spec.requests_group().then(|| super::controller(&config));

    let (cancel, signal) = supervise::channel();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("  {YELLOW}Stopping container...{RESET}");
        cancel.cancel();
    })
    .context("failed to install the signal handler")?;

    print_summary(&spec);
    let outcome = ContainerLauncher::new(spec, controller, options).launch(signal)?;
    print_outcome(&outcome);

    Ok(exit_code(outcome.exit_code()))
}

fn print_summary(spec: &ContainerSpec) {
    eprintln!();
    eprintln!(
        "  {BOLD}minidock{RESET} {DIM}v{}{RESET}  {}",
        env!("CARGO_PKG_VERSION"),
        spec.command
    );
    eprintln!("  {DIM}rootfs:{RESET}   {}", spec.rootfs.display());
    if let Some(hostname) = &spec.hostname {
        eprintln!("  {DIM}hostname:{RESET} {hostname}");
    }
    if let Some(limits) = spec.resource_limits {
        if let Some(bytes) = limits.memory_bytes {
            eprintln!("  {DIM}memory:{RESET}   {}", format_bytes(bytes));
        }
        if let Some(cores) = limits.cpu_cores {
            eprintln!("  {DIM}cpus:{RESET}     {cores}");
        }
    }
    eprintln!();
}

fn print_outcome(outcome: &ContainerOutcome) {
    match outcome {
        ContainerOutcome::Exited(0) => {}
        ContainerOutcome::Exited(code) => eprintln!("  {DIM}exited with status {code}{RESET}"),
        ContainerOutcome::Signaled(signal) => {
            eprintln!("  {RED}killed by signal {signal}{RESET}");
        }
        ContainerOutcome::SpawnFailed(failure) => eprintln!("  {RED}{BOLD}Error:{RESET} {failure}"),
        ContainerOutcome::Cancelled => eprintln!("  {GREEN}Container stopped.{RESET}"),
    }
}

/// Converts a container status to a process exit code; out-of-range is failure.
fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
