//! Control-file names for each cgroup protocol version.
//!
//! The two kernel interfaces expose the same concerns under different,
//! incompatible file names. Everything else in this module tree looks names
//! up here instead of hard-coding them.

use std::path::Path;

use minidock_common::types::CgroupVersion;

/// Where the CPU bandwidth limit is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuFiles {
    /// Separate quota and period files, both in microseconds.
    Cfs {
        /// Quota file name.
        quota: &'static str,
        /// Period file name.
        period: &'static str,
    },
    /// A single file taking `"<quota> <period>"`.
    Max(&'static str),
}

/// Control-file names for one protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFiles {
    /// Hard memory limit in bytes.
    pub memory_limit: &'static str,
    /// Current memory usage in bytes.
    pub memory_usage: &'static str,
    /// CPU bandwidth limit.
    pub cpu: CpuFiles,
    /// `key value` CPU accounting lines.
    pub cpu_stat: &'static str,
    /// Process membership, one pid per line.
    pub procs: &'static str,
}

/// Legacy per-controller layout.
pub const V1_FILES: ControlFiles = ControlFiles {
    memory_limit: "memory.limit_in_bytes",
    memory_usage: "memory.usage_in_bytes",
    cpu: CpuFiles::Cfs {
        quota: "cpu.cfs_quota_us",
        period: "cpu.cfs_period_us",
    },
    cpu_stat: "cpuacct.stat",
    procs: "cgroup.procs",
};

/// Unified hierarchy layout.
pub const V2_FILES: ControlFiles = ControlFiles {
    memory_limit: "memory.max",
    memory_usage: "memory.current",
    cpu: CpuFiles::Max("cpu.max"),
    cpu_stat: "cpu.stat",
    procs: "cgroup.procs",
};

/// Controllers a v2 parent must delegate for limits to be writable.
pub const V2_CONTROLLERS: &str = "+cpu +memory";

/// Returns the file table for a version. An unresolved `Auto` uses v1.
#[must_use]
pub const fn control_files(version: CgroupVersion) -> &'static ControlFiles {
    match version {
        CgroupVersion::V2 => &V2_FILES,
        CgroupVersion::V1 | CgroupVersion::Auto => &V1_FILES,
    }
}

/// Reports v2 when the root exposes `cgroup.controllers`, v1 otherwise.
#[must_use]
pub fn detect_version(root: &Path) -> CgroupVersion {
    if root.join("cgroup.controllers").exists() {
        CgroupVersion::V2
    } else {
        CgroupVersion::V1
    }
}

/// Resolves `Auto` against the filesystem; explicit versions pass through.
#[must_use]
pub fn resolve_version(requested: CgroupVersion, root: &Path) -> CgroupVersion {
    match requested {
        CgroupVersion::Auto => detect_version(root),
        explicit => explicit,
    }
}
