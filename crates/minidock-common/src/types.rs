//! Domain primitive types used across the minidock workspace.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::MinidockError;

/// Last timestamp handed out by [`ContainerId::generate`].
static LAST_GENERATED: AtomicI64 = AtomicI64::new(0);

/// Unique identifier for a container instance.
///
/// Doubles as the name of the container's cgroup directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from an existing string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh ID of the form `minidock-<nanoseconds since epoch>`.
    ///
    /// IDs generated by one process are strictly increasing even when the
    /// wall clock stalls or steps backwards.
    #[must_use]
    pub fn generate() -> Self {
        let now = chrono::Utc::now();
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
        let previous = LAST_GENERATED
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(nanos.max(last.saturating_add(1)))
            })
            .unwrap_or(nanos);
        let stamp = nanos.max(previous.saturating_add(1));
        Self(format!("{}-{stamp}", crate::constants::CONTAINER_ID_PREFIX))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource limits requested for a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in bytes.
    pub memory_bytes: Option<u64>,
    /// CPU limit in cores; fractional values are allowed.
    pub cpu_cores: Option<f64>,
}

impl ResourceLimits {
    /// Returns whether any limit is set, i.e. whether a cgroup is needed.
    #[must_use]
    pub const fn requests_group(&self) -> bool {
        self.memory_bytes.is_some() || self.cpu_cores.is_some()
    }
}

/// Which cgroup control-file protocol the host exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupVersion {
    /// Detect the layout from the cgroup root at startup.
    #[default]
    Auto,
    /// Legacy per-controller files (`memory.limit_in_bytes`, `cpu.cfs_quota_us`).
    V1,
    /// Unified hierarchy files (`memory.max`, `cpu.max`).
    V2,
}

impl fmt::Display for CgroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

impl FromStr for CgroupVersion {
    type Err = MinidockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "v1" | "1" => Ok(Self::V1),
            "v2" | "2" => Ok(Self::V2),
            other => Err(MinidockError::Config {
                message: format!("unknown cgroup version '{other}' (expected auto, v1 or v2)"),
            }),
        }
    }
}

/// Result of a best-effort resource operation.
///
/// The operation itself never fails the caller; the caller decides what a
/// degraded or fatal outcome means for the capability it was configuring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The setting took effect.
    Applied,
    /// The host cannot honour the setting here (no privilege, controller
    /// or control file unavailable). The container can run without it.
    Degraded {
        /// Why the setting was not applied.
        reason: String,
    },
    /// The setting was rejected for a reason other than host support.
    Fatal {
        /// Why the setting was rejected.
        reason: String,
    },
}

impl Outcome {
    /// Classifies an I/O error from a control-file access.
    #[must_use]
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::Degraded {
                reason: format!("insufficient privilege: {err}"),
            },
            io::ErrorKind::NotFound => Self::Degraded {
                reason: format!("control file unavailable: {err}"),
            },
            _ => Self::Fatal {
                reason: err.to_string(),
            },
        }
    }

    /// Returns whether the setting took effect.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}
