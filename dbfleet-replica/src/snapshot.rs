//! Hash-gated snapshot writer.
//!
//! ## `take_snapshot` protocol
//!
//! 1. Stream the source into `snapshots/pending.snap.tmp`, hashing as it goes
//!    (one read, so the stored bytes are exactly the hashed bytes).
//! 2. Compare the SHA-256 with the newest manifest entry → drop the temp file
//!    if identical.
//! 3. Rename the temp file to `snapshots/<id>.snap` (atomic on POSIX).
//! 4. Append the manifest entry, prune beyond `retain`, save the manifest.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{io_err, ReplicaError};
use crate::manifest::{self, Manifest, SnapshotEntry, SNAPSHOT_DIR};

const COPY_BUFFER: usize = 64 * 1024;

/// Outcome of a single snapshot attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotResult {
    /// New content was stored.
    Written { entry: SnapshotEntry, path: PathBuf },
    /// Content matches the newest stored snapshot.
    Unchanged { id: String },
    /// The source file no longer exists.
    SourceMissing,
}

/// Snapshot `source` into `target` and update `manifest` (saved on write).
pub fn take_snapshot(
    source: &Path,
    target: &Path,
    manifest: &mut Manifest,
    retain: usize,
) -> Result<SnapshotResult, ReplicaError> {
    let mut input = match File::open(source) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(SnapshotResult::SourceMissing),
        Err(err) => return Err(io_err(source, err)),
    };

    let snapshots = target.join(SNAPSHOT_DIR);
    std::fs::create_dir_all(&snapshots).map_err(|e| io_err(&snapshots, e))?;
    let tmp = snapshots.join("pending.snap.tmp");

    let (digest, size) = match copy_hashing(&mut input, source, &tmp) {
        Ok(copied) => copied,
        Err(err) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(err);
        }
    };

    if let Some(latest) = manifest.latest() {
        if latest.sha256 == digest {
            let _ = std::fs::remove_file(&tmp);
            tracing::debug!(source = %source.display(), id = %latest.id, "snapshot unchanged");
            return Ok(SnapshotResult::Unchanged {
                id: latest.id.clone(),
            });
        }
    }

    let now = Utc::now();
    let entry = SnapshotEntry {
        id: snapshot_id(now, &digest),
        created_at: now,
        size,
        sha256: digest,
    };
    let path = manifest::snapshot_path(target, &entry.id);
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }

    manifest.snapshots.push(entry.clone());
    manifest.updated_at = now;
    prune(target, manifest, retain);
    manifest::save(target, manifest)?;

    tracing::info!(
        source = %source.display(),
        id = %entry.id,
        size = entry.size,
        "snapshot written",
    );
    Ok(SnapshotResult::Written { entry, path })
}

/// `<yyyymmddThhmmss.mmmZ>-<first 12 hex chars of the digest>`
pub fn snapshot_id(at: DateTime<Utc>, digest: &str) -> String {
    let prefix = &digest[..digest.len().min(12)];
    format!("{}-{prefix}", at.format("%Y%m%dT%H%M%S%.3fZ"))
}

/// SHA-256 hex digest of a file's content.
pub fn hash_file(path: &Path) -> Result<String, ReplicaError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    loop {
        let n = file.read(&mut buf).map_err(|e| io_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn copy_hashing(
    input: &mut File,
    source: &Path,
    tmp: &Path,
) -> Result<(String, u64), ReplicaError> {
    let mut output = File::create(tmp).map_err(|e| io_err(tmp, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut size = 0u64;
    loop {
        let n = input.read(&mut buf).map_err(|e| io_err(source, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n]).map_err(|e| io_err(tmp, e))?;
        size += n as u64;
    }
    output.sync_all().map_err(|e| io_err(tmp, e))?;
    Ok((hex::encode(hasher.finalize()), size))
}

fn prune(target: &Path, manifest: &mut Manifest, retain: usize) {
    let retain = retain.max(1);
    while manifest.snapshots.len() > retain {
        let oldest = manifest.snapshots.remove(0);
        let path = manifest::snapshot_path(target, &oldest.id);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(id = %oldest.id, "pruned snapshot"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to prune snapshot",
            ),
        }
    }
}
