//! `chroot(2)` into the container rootfs.
//!
//! Runs after the mount namespace has been made private; executables are
//! resolved relative to the new root from here on.

use std::path::Path;

use nix::unistd::{chdir, chroot};

/// Changes the process root to `rootfs` and the working directory to `/`.
///
/// # Errors
///
/// Returns the errno of whichever call failed.
pub fn enter_root(rootfs: &Path) -> nix::Result<()> {
    chroot(rootfs)?;
    chdir("/")
}
