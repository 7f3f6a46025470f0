//! Mount namespace propagation.

use nix::mount::{MsFlags, mount};

/// Marks every mount in the current namespace private, recursively.
///
/// Called right after the mount namespace is unshared so that nothing the
/// container mounts later propagates back to the host.
///
/// # Errors
///
/// Returns the `mount(2)` errno.
pub fn make_mounts_private() -> nix::Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
}
