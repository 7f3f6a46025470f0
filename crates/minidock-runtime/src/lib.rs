//! Container lifecycle for the minidock runtime.
//!
//! [`launcher::ContainerLauncher`] validates a [`container::ContainerSpec`],
//! prepares its cgroup, spawns the isolated process through
//! [`process::spawn_isolated`], supervises it until exit or cancellation and
//! always cleans up afterwards.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod container;
pub mod launcher;
pub mod process;
pub mod supervise;
