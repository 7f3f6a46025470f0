//! Linux namespace isolation for the container process.
//!
//! The helpers here run in the forked child before `exec`, so they neither
//! allocate nor log; failures come back as raw [`nix::Error`] values.

pub mod mount;
pub mod uts;

use nix::sched::{CloneFlags, unshare};

/// Which namespaces the isolated process gets private copies of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Isolate the PID namespace. Takes effect for children of the caller.
    pub pid: bool,
    /// Isolate the UTS (hostname) namespace.
    pub uts: bool,
    /// Isolate the mount namespace.
    pub mount: bool,
    /// Isolate the network namespace.
    pub network: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            pid: true,
            uts: true,
            mount: true,
            network: false,
        }
    }
}

impl NamespaceConfig {
    /// Maps the configuration to `unshare(2)` flags.
    #[must_use]
    pub fn clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        flags.set(CloneFlags::CLONE_NEWPID, self.pid);
        flags.set(CloneFlags::CLONE_NEWUTS, self.uts);
        flags.set(CloneFlags::CLONE_NEWNS, self.mount);
        flags.set(CloneFlags::CLONE_NEWNET, self.network);
        flags
    }
}

/// Moves the calling process into fresh copies of the configured namespaces.
///
/// # Errors
///
/// Returns the `unshare(2)` errno, typically `EPERM` without `CAP_SYS_ADMIN`.
pub fn unshare_namespaces(config: &NamespaceConfig) -> nix::Result<()> {
    unshare(config.clone_flags())
}
