//! System-wide constants and default paths.

/// Mount point of the cgroup filesystem on a standard Linux host.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Name of the group under [`CGROUP_ROOT`] holding one child group per container.
pub const CGROUP_GROUP_NAME: &str = "minidock";

/// Prefix of generated container identifiers.
pub const CONTAINER_ID_PREFIX: &str = "minidock";

/// CFS scheduling period written alongside every CPU quota, in microseconds.
pub const CPU_PERIOD_US: u64 = 100_000;

/// Rootfs used by `minidock run` when `--rootfs` is not given.
pub const DEFAULT_ROOTFS: &str = "./rootfs/alpine";

/// Seconds to wait for the isolated process after a graceful stop request
/// before the cgroup backstop force-kills its members.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Longest hostname accepted by `sethostname(2)` (`HOST_NAME_MAX`).
pub const HOSTNAME_MAX_LEN: usize = 64;

/// Exit status reported when the target executable cannot be found.
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// Exit status reported for validation failures and fatal setup errors.
pub const EXIT_FAILURE: i32 = 1;

/// Offset added to a signal number when a program is killed by it.
pub const EXIT_SIGNAL_BASE: i32 = 128;

/// Application name used in CLI output.
pub const APP_NAME: &str = "minidock";
