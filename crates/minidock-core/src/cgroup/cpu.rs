//! CPU bandwidth control.
//!
//! A limit of `cores` becomes a CFS quota of `floor(cores * 100000)`
//! microseconds per 100000 microsecond period.

use std::path::Path;

use minidock_common::constants::CPU_PERIOD_US;
use minidock_common::error::{MinidockError, Result};

use super::protocol::CpuFiles;

/// Converts a core count into a CFS quota in microseconds.
///
/// Fractional cores are allowed; the quota truncates toward zero. Returns
/// `None` for non-finite or non-positive input.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
#[must_use]
pub fn cfs_quota(cores: f64) -> Option<u64> {
    if !cores.is_finite() || cores <= 0.0 {
        return None;
    }
    Some((cores * CPU_PERIOD_US as f64).floor() as u64)
}

/// Writes a CPU bandwidth limit using whichever file layout the group has.
///
/// For the split layout the quota is written before the period.
///
/// # Errors
///
/// Returns an error if writing either control file fails.
pub fn set_cpu_quota(group: &Path, files: CpuFiles, quota_us: u64, period_us: u64) -> Result<()> {
    match files {
        CpuFiles::Cfs { quota, period } => {
            write_control(group, quota, &quota_us.to_string())?;
            write_control(group, period, &period_us.to_string())?;
        }
        CpuFiles::Max(file) => {
            write_control(group, file, &format!("{quota_us} {period_us}"))?;
        }
    }
    tracing::debug!(quota_us, period_us, "CPU quota set");
    Ok(())
}

fn write_control(group: &Path, name: &str, value: &str) -> Result<()> {
    let file = group.join(name);
    std::fs::write(&file, value).map_err(|e| MinidockError::Io {
        path: file,
        source: e,
    })
}
