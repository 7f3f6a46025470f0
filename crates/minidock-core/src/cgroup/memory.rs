//! Memory limit and usage control files.

use std::path::Path;

use minidock_common::error::{MinidockError, Result};

/// Writes a hard memory limit as a plain decimal byte count.
///
/// # Errors
///
/// Returns an error if writing the limit file fails.
pub fn set_memory_limit(group: &Path, file: &str, bytes: u64) -> Result<()> {
    let path = group.join(file);
    std::fs::write(&path, bytes.to_string()).map_err(|e| MinidockError::Io { path, source: e })?;
    tracing::debug!(bytes, "memory limit set");
    Ok(())
}

/// Reads the current usage in bytes; `None` if missing or unparsable.
#[must_use]
pub fn read_memory_usage(group: &Path, file: &str) -> Option<u64> {
    std::fs::read_to_string(group.join(file))
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_written_without_separators() {
        let dir = tempfile::tempdir().expect("tempdir");
        set_memory_limit(dir.path(), "memory.limit_in_bytes", 104_857_600).expect("write");
        let written = std::fs::read_to_string(dir.path().join("memory.limit_in_bytes")).unwrap();
        assert_eq!(written, "104857600");
    }

    #[test]
    fn zero_is_a_valid_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        set_memory_limit(dir.path(), "memory.max", 0).expect("write");
        let written = std::fs::read_to_string(dir.path().join("memory.max")).unwrap();
        assert_eq!(written, "0");
    }

    #[test]
    fn usage_parses_trailing_newline() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("memory.usage_in_bytes"), "4096\n").unwrap();
        assert_eq!(read_memory_usage(dir.path(), "memory.usage_in_bytes"), Some(4096));
    }

    #[test]
    fn usage_is_none_when_garbled() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("memory.current"), "max\n").unwrap();
        assert_eq!(read_memory_usage(dir.path(), "memory.current"), None);
        assert_eq!(read_memory_usage(dir.path(), "absent"), None);
    }
}
