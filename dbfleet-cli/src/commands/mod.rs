pub mod daemon;
pub mod init;
pub mod snapshots;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use dbfleet_core::{config, ConfigError, FleetConfig};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Load `explicit` or `~/.dbfleet/config.yaml`. A missing default file
/// yields the built-in defaults; a missing explicit file is an error.
pub(crate) fn load_config(home: &Path, explicit: Option<&Path>) -> Result<FleetConfig> {
    let loaded = match explicit {
        Some(path) => config::load_from(path),
        None => match config::load_at(home) {
            Err(ConfigError::NotFound { .. }) => Ok(FleetConfig::default()),
            other => other,
        },
    };
    let config = loaded.context("failed to load dbfleet config")?;
    Ok(config.with_home_defaults(home))
}

/// `5m ago`-style age used in tables.
pub(crate) fn format_age(timestamp: DateTime<Utc>) -> String {
    let seconds = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0) as u64;
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
