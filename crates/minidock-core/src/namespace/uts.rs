//! UTS namespace: the container's own hostname.

use std::ffi::OsStr;

/// Sets the kernel hostname of the current UTS namespace.
///
/// # Errors
///
/// Returns the `sethostname(2)` errno, `EPERM` without privilege.
pub fn set_hostname(name: &OsStr) -> nix::Result<()> {
    nix::unistd::sethostname(name)
}
