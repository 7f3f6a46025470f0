//! `minidock ps`: list container groups with their resource usage.

use std::process::ExitCode;

use clap::Args;
use minidock_common::config::MinidockConfig;
use minidock_core::cgroup::ResourceUsage;

use crate::output::{format_bytes, format_cpu};

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the JSON output cannot be serialized.
pub fn execute(args: &PsArgs, config: &MinidockConfig) -> anyhow::Result<ExitCode> {
    let controller = super::controller(config);
    let usage: Vec<ResourceUsage> = controller
        .list_containers()
        .iter()
        .map(|id| controller.usage(id))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&usage)?);
        return Ok(ExitCode::SUCCESS);
    }

    if usage.is_empty() {
        println!("No containers found.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("{:<32} {:<12} {:<20}", "CONTAINER ID", "MEMORY", "CPU");
    for entry in &usage {
        println!(
            "{:<32} {:<12} {:<20}",
            entry.container_id,
            entry.memory_bytes.map_or_else(|| "-".to_string(), format_bytes),
            entry.cpu.as_ref().map_or_else(|| "-".to_string(), format_cpu),
        );
    }
    Ok(ExitCode::SUCCESS)
}
