//! # minidock-core
//!
//! Low-level Linux isolation primitives for the minidock runtime.
//!
//! This crate provides:
//! - **Cgroups**: the [`cgroup::ResourceController`], which owns one group per
//!   container and programs its memory and CPU limits (v1 or v2 file layout).
//! - **Namespaces**: PID, UTS and mount isolation via `unshare(2)`.
//! - **Filesystem**: switching the process root with `chroot(2)`.
//!
//! The namespace, filesystem and `cgroup::procs::write_pid` helpers are meant
//! to run between `fork` and `exec`. They do not allocate and do not log.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
