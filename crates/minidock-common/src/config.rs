//! Configuration model for the minidock runtime.
//!
//! Values come from [`MinidockConfig::default`], optionally overlaid by a JSON
//! file; the CLI applies its flags and `MINIDOCK_*` variables on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MinidockError, Result};
use crate::types::CgroupVersion;

/// Root configuration for the minidock runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinidockConfig {
    /// Mount point of the cgroup filesystem.
    pub cgroup_root: PathBuf,
    /// Group under `cgroup_root` that holds one directory per container.
    pub group_name: String,
    /// Control-file protocol to use.
    pub cgroup_version: CgroupVersion,
    /// Rootfs used when a run does not name one.
    pub default_rootfs: PathBuf,
    /// Grace period after a stop request before the cgroup backstop kills.
    pub stop_timeout_secs: u64,
    /// Refuse to launch when a requested limit cannot be applied.
    pub strict_limits: bool,
}

impl Default for MinidockConfig {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from(crate::constants::CGROUP_ROOT),
            group_name: crate::constants::CGROUP_GROUP_NAME.to_string(),
            cgroup_version: CgroupVersion::Auto,
            default_rootfs: PathBuf::from(crate::constants::DEFAULT_ROOTFS),
            stop_timeout_secs: crate::constants::DEFAULT_STOP_TIMEOUT_SECS,
            strict_limits: false,
        }
    }
}

impl MinidockConfig {
    /// Loads a configuration file; fields it omits keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// names an empty group.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| MinidockError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that serde cannot reject on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the group name is empty or contains a path separator.
    pub fn validate(&self) -> Result<()> {
        if self.group_name.is_empty() || self.group_name.contains('/') {
            return Err(MinidockError::Config {
                message: format!("invalid cgroup group name '{}'", self.group_name),
            });
        }
        Ok(())
    }

    /// Returns the graceful stop window as a [`Duration`].
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_system_cgroup_root() {
        let config = MinidockConfig::default();
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
        assert_eq!(config.group_name, "minidock");
        assert_eq!(config.stop_timeout(), Duration::from_secs(10));
        assert!(!config.strict_limits);
    }

    #[test]
    fn load_overlays_partial_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("minidock.json");
        std::fs::write(&path, r#"{ "group_name": "ci", "cgroup_version": "v1" }"#)
            .expect("write config");

        let config = MinidockConfig::load(&path).expect("load");
        assert_eq!(config.group_name, "ci");
        assert_eq!(config.cgroup_version, CgroupVersion::V1);
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
    }

    #[test]
    fn load_rejects_group_with_separator() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("minidock.json");
        std::fs::write(&path, r#"{ "group_name": "a/b" }"#).expect("write config");

        assert!(matches!(
            MinidockConfig::load(&path),
            Err(MinidockError::Config { .. })
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = MinidockConfig::load(Path::new("/nonexistent/minidock.json"))
            .expect_err("missing file");
        assert!(matches!(err, MinidockError::Io { .. }));
    }
}
