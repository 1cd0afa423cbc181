//! Error types for dbfleet-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::EngineError;
use crate::types::{ClientId, RemoteLocator};

/// A string that is not a well-formed client identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid client identifier '{0}': expected xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx")]
pub struct InvalidClientId(pub String);

/// Failures surfaced by the replication engine through the session adapter.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The engine refused to open the database file (missing, locked, permissions).
    #[error("failed to open replication session for {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    /// The session opened but the remote target could not be attached.
    #[error("failed to attach remote target {locator} for {path}: {source}")]
    Attach {
        path: PathBuf,
        locator: RemoteLocator,
        #[source]
        source: EngineError,
    },

    /// Orderly shutdown of the session reported an error.
    #[error("failed to stop replication session for {path}: {source}")]
    Close {
        path: PathBuf,
        #[source]
        source: EngineError,
    },
}

/// Reasons a `register` call was refused. "Not a client" is not an error;
/// see [`crate::RegisterOutcome::NotAClient`].
#[derive(Debug, Error)]
pub enum RegisterError {
    /// The identity already has a live record. Benign: scan/event races land here.
    #[error("client already registered: {identity} ({path})")]
    AlreadyRegistered { identity: ClientId, path: PathBuf },

    /// The path is already mapped to a different identity.
    #[error("path already mapped to client: {path} -> {existing}")]
    PathConflict { path: PathBuf, existing: ClientId },

    /// The replication engine could not start a session for the file.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The registry has been closed for shutdown.
    #[error("registry is closed; shutdown in progress")]
    Closed,
}

/// All errors that can arise from loading or saving `config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.dbfleet/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub(crate) fn config_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
