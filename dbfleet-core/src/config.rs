//! `~/.dbfleet/config.yaml`: daemon configuration.
//!
//! # API pattern
//!
//! As elsewhere in dbfleet, filesystem entry points come in two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{config_io_err, ConfigError};
use crate::identity::default_extensions;
use crate::types::DEFAULT_REMOTE_ROOT;

/// Directory under `$HOME` holding the config, socket and default replica.
pub const FLEET_DIR: &str = ".dbfleet";
pub const CONFIG_FILE: &str = "config.yaml";

/// `<home>/.dbfleet`
pub fn fleet_root(home: &Path) -> PathBuf {
    home.join(FLEET_DIR)
}

/// `<home>/.dbfleet/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    fleet_root(home).join(CONFIG_FILE)
}

/// `<home>/.dbfleet/replica`: replica root used when none is configured.
pub fn default_replica_root(home: &Path) -> PathBuf {
    fleet_root(home).join("replica")
}

/// Daemon configuration. Every field has a default so partial files load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Directories scanned and watched for client databases.
    pub watch_dirs: Vec<PathBuf>,
    /// Root of the replica target (stand-in for the object-storage bucket).
    pub replica_root: PathBuf,
    /// Prefix of every remote locator: `<remote_root>/<client-id>`.
    pub remote_root: String,
    /// Database-file extension allow-list.
    pub extensions: Vec<String>,
    pub snapshot_interval_ms: u64,
    pub retain_snapshots: usize,
    /// Per-session bound on shutdown drain.
    pub stop_timeout_ms: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            watch_dirs: Vec::new(),
            replica_root: PathBuf::new(),
            remote_root: DEFAULT_REMOTE_ROOT.to_string(),
            extensions: default_extensions(),
            snapshot_interval_ms: 1_000,
            retain_snapshots: 24,
            stop_timeout_ms: 10_000,
        }
    }
}

impl FleetConfig {
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Fill in home-relative defaults that cannot be expressed statically.
    pub fn with_home_defaults(mut self, home: &Path) -> Self {
        if self.replica_root.as_os_str().is_empty() {
            self.replica_root = default_replica_root(home);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_dirs.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one watch directory is required".to_string(),
            ));
        }
        if self.replica_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("replica_root must be set".to_string()));
        }
        if self.remote_root.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("remote_root must not be empty".to_string()));
        }
        if self.extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "extensions allow-list must not be empty".to_string(),
            ));
        }
        if self.snapshot_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "snapshot_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.retain_snapshots == 0 {
            return Err(ConfigError::Invalid(
                "retain_snapshots must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse comma-separated directory lists (`/a, /b`) the way `--watch-dir` accepts them.
pub fn split_dir_list(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load a config file. Returns `ConfigError::NotFound` if absent and
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_from(path: &Path) -> Result<FleetConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| config_io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `<home>/.dbfleet/config.yaml`.
pub fn load_at(home: &Path) -> Result<FleetConfig, ConfigError> {
    load_from(&config_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<FleetConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically save to `path`: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_to(path: &Path, config: &FleetConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| config_io_err(dir, e))?;
            set_dir_permissions(dir)?;
        }
    }
    let tmp = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml).map_err(|e| config_io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, path).map_err(|e| config_io_err(path, e))?;
    Ok(())
}

/// Save to `<home>/.dbfleet/config.yaml`.
pub fn save_at(home: &Path, config: &FleetConfig) -> Result<PathBuf, ConfigError> {
    let path = config_path_at(home);
    save_to(&path, config)?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &FleetConfig) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| config_io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| config_io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
