//! Replication engine boundary and the per-client session lifecycle.
//!
//! The core never looks inside the engine: it opens a handle for a file,
//! attaches the deterministic remote target and later closes it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::SessionError;
use crate::types::{ClientId, RemoteLocator};

/// Error type produced by engine implementations.
pub type EngineError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Opens replication handles for database files.
pub trait ReplicationEngine: Send + Sync {
    /// Open `path` for replication. Must not leave anything running on error.
    fn open(&self, path: &Path) -> Result<Box<dyn ReplicaHandle>, EngineError>;
}

/// One open replication job.
pub trait ReplicaHandle: Send + Sync {
    /// Bind the handle to its remote location and start shipping state.
    fn attach_remote_target(&mut self, locator: &RemoteLocator) -> Result<(), EngineError>;

    /// Drain pending state and stop. Called at most once by [`SessionAdapter`].
    fn close(&mut self) -> Result<(), EngineError>;
}

/// A running replication job bound to exactly one `(identity, path)` pair.
pub struct Session {
    identity: ClientId,
    path: PathBuf,
    locator: RemoteLocator,
    handle: Option<Box<dyn ReplicaHandle>>,
}

impl Session {
    pub fn identity(&self) -> &ClientId {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn locator(&self) -> &RemoteLocator {
        &self.locator
    }

    /// False once the session has been stopped.
    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("path", &self.path)
            .field("locator", &self.locator)
            .field("live", &self.is_live())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            tracing::warn!(
                client = %self.identity,
                path = %self.path.display(),
                "session dropped while live; closing",
            );
            if let Err(err) = handle.close() {
                tracing::warn!(client = %self.identity, error = %err, "close on drop failed");
            }
        }
    }
}

/// Creates and stops [`Session`]s on top of a [`ReplicationEngine`].
#[derive(Clone)]
pub struct SessionAdapter {
    engine: Arc<dyn ReplicationEngine>,
    remote_root: String,
}

impl SessionAdapter {
    pub fn new(engine: Arc<dyn ReplicationEngine>, remote_root: impl Into<String>) -> Self {
        Self {
            engine,
            remote_root: remote_root.into(),
        }
    }

    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    pub fn locator_for(&self, identity: &ClientId) -> RemoteLocator {
        RemoteLocator::for_client(&self.remote_root, identity)
    }

    /// Open `path`, attach `<remote_root>/<identity>` and return the live session.
    ///
    /// A handle whose attach fails is closed before the error is returned.
    pub fn start(&self, identity: &ClientId, path: &Path) -> Result<Session, SessionError> {
        let locator = self.locator_for(identity);
        let mut handle = self.engine.open(path).map_err(|source| SessionError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        if let Err(source) = handle.attach_remote_target(&locator) {
            if let Err(err) = handle.close() {
                tracing::warn!(
                    client = %identity,
                    error = %err,
                    "closing half-open session failed",
                );
            }
            return Err(SessionError::Attach {
                path: path.to_path_buf(),
                locator,
                source,
            });
        }

        Ok(Session {
            identity: identity.clone(),
            path: path.to_path_buf(),
            locator,
            handle: Some(handle),
        })
    }

    /// Orderly shutdown. Stopping an already-stopped session is a no-op.
    pub fn stop(&self, session: &mut Session) -> Result<(), SessionError> {
        let Some(mut handle) = session.handle.take() else {
            return Ok(());
        };
        handle.close().map_err(|source| SessionError::Close {
            path: session.path.clone(),
            source,
        })
    }
}

impl fmt::Debug for SessionAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAdapter")
            .field("remote_root", &self.remote_root)
            .finish_non_exhaustive()
    }
}
