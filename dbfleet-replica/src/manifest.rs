//! Replica manifest: the per-client index of stored snapshots.
//!
//! Persists a [`Manifest`] JSON document at
//! `<replica_root>/<remote-locator>/manifest.json`. Writes use the atomic
//! `.tmp` + rename pattern so a reader never sees a half-written manifest.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dbfleet_core::RemoteLocator;

use crate::error::{io_err, ReplicaError};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SNAPSHOT_DIR: &str = "snapshots";
pub const SNAPSHOT_EXT: &str = "snap";

/// One stored snapshot of a client database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// `<UTC timestamp>-<sha256 prefix>`; sorts chronologically.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub sha256: String,
}

/// On-disk manifest payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub locator: String,
    pub updated_at: DateTime<Utc>,
    /// Oldest first.
    #[serde(default)]
    pub snapshots: Vec<SnapshotEntry>,
}

impl Manifest {
    pub fn empty(locator: &RemoteLocator) -> Self {
        Self {
            locator: locator.to_string(),
            updated_at: Utc::now(),
            snapshots: Vec::new(),
        }
    }

    pub fn latest(&self) -> Option<&SnapshotEntry> {
        self.snapshots.last()
    }
}

/// `<root>/<locator segments…>`
pub fn target_dir(root: &Path, locator: &RemoteLocator) -> PathBuf {
    locator
        .segments()
        .fold(root.to_path_buf(), |dir, segment| dir.join(segment))
}

pub fn manifest_path(target: &Path) -> PathBuf {
    target.join(MANIFEST_FILE)
}

/// `<target>/snapshots/<id>.snap`
pub fn snapshot_path(target: &Path, id: &str) -> PathBuf {
    target.join(SNAPSHOT_DIR).join(format!("{id}.{SNAPSHOT_EXT}"))
}

/// Load the manifest under `target`.
///
/// Returns an empty manifest if the file does not yet exist.
pub fn load(target: &Path, locator: &RemoteLocator) -> Result<Manifest, ReplicaError> {
    let path = manifest_path(target);
    if !path.exists() {
        return Ok(Manifest::empty(locator));
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save the manifest under `target` atomically.
///
/// Writes to `manifest.json.tmp` then renames to `manifest.json`.
pub fn save(target: &Path, manifest: &Manifest) -> Result<(), ReplicaError> {
    std::fs::create_dir_all(target).map_err(|e| io_err(target, e))?;
    let path = manifest_path(target);
    let json = serde_json::to_string_pretty(manifest)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}
