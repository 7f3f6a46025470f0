//! `minidock version`: print the version.

use minidock_common::constants::APP_NAME;

/// Executes the `version` command.
pub fn execute() {
    println!("{APP_NAME} v{}", env!("CARGO_PKG_VERSION"));
}
