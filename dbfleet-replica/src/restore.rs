//! Read side of the replica layout: listing and restoring snapshots.

use std::path::{Path, PathBuf};

use dbfleet_core::RemoteLocator;

use crate::error::{io_err, ReplicaError};
use crate::manifest::{self, SnapshotEntry};
use crate::snapshot::hash_file;

/// Result of [`restore_latest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored {
        snapshot: SnapshotEntry,
        output: PathBuf,
    },
    /// `output` already exists; it is never overwritten.
    SkippedExisting { output: PathBuf },
}

/// Stored snapshots for `locator`, oldest first. Empty if none exist.
pub fn list_snapshots(
    root: &Path,
    locator: &RemoteLocator,
) -> Result<Vec<SnapshotEntry>, ReplicaError> {
    let target = manifest::target_dir(root, locator);
    Ok(manifest::load(&target, locator)?.snapshots)
}

/// Copy the newest snapshot of `locator` to `output`.
///
/// The stored file is verified against its manifest checksum before the
/// copy lands; the copy itself goes through a `.tmp` sibling and a rename.
pub fn restore_latest(
    root: &Path,
    locator: &RemoteLocator,
    output: &Path,
) -> Result<RestoreOutcome, ReplicaError> {
    if output.exists() {
        tracing::info!(output = %output.display(), "restore target exists; skipping");
        return Ok(RestoreOutcome::SkippedExisting {
            output: output.to_path_buf(),
        });
    }

    let target = manifest::target_dir(root, locator);
    let manifest = manifest::load(&target, locator)?;
    let Some(latest) = manifest.latest().cloned() else {
        return Err(ReplicaError::NoSnapshots {
            locator: locator.to_string(),
        });
    };

    let stored = manifest::snapshot_path(&target, &latest.id);
    let actual = hash_file(&stored)?;
    if actual != latest.sha256 {
        return Err(ReplicaError::ChecksumMismatch {
            path: stored,
            expected: latest.sha256,
            actual,
        });
    }

    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let mut tmp = output.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::copy(&stored, &tmp).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, output) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(output, e));
    }

    tracing::info!(
        remote = %locator,
        snapshot = %latest.id,
        output = %output.display(),
        "snapshot restored",
    );
    Ok(RestoreOutcome::Restored {
        snapshot: latest,
        output: output.to_path_buf(),
    })
}
