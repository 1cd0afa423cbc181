//! Error types for dbfleet-replica.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from replica operations.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest JSON serialization/deserialization error.
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not a regular file: {path}")]
    NotAFile { path: PathBuf },

    #[error("no snapshots available for {locator}")]
    NoSnapshots { locator: String },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("remote target already attached: {locator}")]
    AlreadyAttached { locator: String },

    #[error("replica worker for {source_path} panicked")]
    WorkerPanicked { source_path: PathBuf },
}

/// Convenience constructor for [`ReplicaError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ReplicaError {
    ReplicaError::Io {
        path: path.into(),
        source,
    }
}
