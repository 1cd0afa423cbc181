use std::path::{Path, PathBuf};

pub use dbfleet_core::config::fleet_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// Probe file created and removed to prove a watch directory is writable.
pub const ACCESS_PROBE_FILE: &str = ".dbfleet-access-test";

pub fn socket_path(home: &Path) -> PathBuf {
    fleet_root(home).join(DAEMON_SOCKET)
}
