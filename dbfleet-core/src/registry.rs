//! Client registry: the authoritative identity → (path, session) mapping.
//!
//! # Layout
//!
//! ```text
//! clients: BTreeMap<ClientId, Entry>     (record + live session, sorted)
//! paths:   HashMap<PathBuf, ClientId>    (reverse index)
//! ```
//!
//! Both maps live behind one reader/writer lock. `register` and `unregister`
//! hold the write lock for their whole transition, including the session
//! start/stop, so no reader ever sees a record without its session or an
//! entry in one map without the other. `snapshot` and `is_registered` take
//! the read lock and copy out.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{RegisterError, SessionError};
use crate::identity::extract_identity;
use crate::session::{Session, SessionAdapter};
use crate::types::{ClientId, ClientRecord, ClientView};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Successful `register` results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A record and a live session now exist for the client.
    Registered(ClientView),
    /// The file name is not a client identifier; nothing happened.
    NotAClient,
}

/// `unregister` results. Neither variant is an error.
#[derive(Debug)]
pub enum UnregisterOutcome {
    /// The record is gone. `stop_error` carries a failed session shutdown;
    /// removal happens regardless.
    Removed {
        identity: ClientId,
        stop_error: Option<SessionError>,
    },
    /// The path was not registered (double delete, or a never-registered file).
    NotRegistered,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Entry {
    record: ClientRecord,
    session: Session,
}

impl Entry {
    fn view(&self) -> ClientView {
        ClientView {
            identity: self.record.identity.clone(),
            file_path: self.record.file_path.clone(),
            remote_locator: self.session.locator().clone(),
            registered_at: self.record.registered_at,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    clients: BTreeMap<ClientId, Entry>,
    paths: HashMap<PathBuf, ClientId>,
    closed: bool,
}

/// Concurrent-safe store of every registered client.
pub struct ClientRegistry {
    adapter: SessionAdapter,
    state: RwLock<RegistryState>,
}

impl ClientRegistry {
    pub fn new(adapter: SessionAdapter) -> Self {
        Self {
            adapter,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn adapter(&self) -> &SessionAdapter {
        &self.adapter
    }

    /// Register the client database at `path` and start its session.
    ///
    /// Checks run in order: identity (→ `NotAClient`), live identity
    /// (→ `AlreadyRegistered`), path index (→ `PathConflict`), session start
    /// (→ `Session`). Nothing is inserted unless the session started.
    pub fn register(&self, path: &Path) -> Result<RegisterOutcome, RegisterError> {
        let Some(identity) = extract_identity(path) else {
            tracing::debug!(path = %path.display(), "not a client file; ignoring");
            return Ok(RegisterOutcome::NotAClient);
        };

        let mut state = self.state.write();
        if state.closed {
            return Err(RegisterError::Closed);
        }
        if let Some(entry) = state.clients.get(&identity) {
            return Err(RegisterError::AlreadyRegistered {
                identity,
                path: entry.record.file_path.clone(),
            });
        }
        if let Some(existing) = state.paths.get(path) {
            return Err(RegisterError::PathConflict {
                path: path.to_path_buf(),
                existing: existing.clone(),
            });
        }

        let session = self.adapter.start(&identity, path)?;
        let entry = Entry {
            record: ClientRecord {
                identity: identity.clone(),
                file_path: path.to_path_buf(),
                registered_at: Utc::now(),
            },
            session,
        };
        let view = entry.view();
        state.paths.insert(path.to_path_buf(), identity.clone());
        state.clients.insert(identity, entry);

        tracing::info!(
            client = %view.identity,
            path = %view.file_path.display(),
            remote = %view.remote_locator,
            "client registered",
        );
        Ok(RegisterOutcome::Registered(view))
    }

    /// Stop the session for `path` and drop its record.
    ///
    /// Unknown paths are a no-op so that remove events racing a prior
    /// unregister are harmless.
    pub fn unregister(&self, path: &Path) -> UnregisterOutcome {
        let mut state = self.state.write();
        let Some(identity) = state.paths.get(path).cloned() else {
            tracing::debug!(path = %path.display(), "unregister: path not registered");
            return UnregisterOutcome::NotRegistered;
        };

        let stop_error = match state.clients.get_mut(&identity) {
            Some(entry) => self.adapter.stop(&mut entry.session).err(),
            None => None,
        };
        state.clients.remove(&identity);
        state.paths.remove(path);
        drop(state);

        match &stop_error {
            Some(err) => tracing::warn!(
                client = %identity,
                error = %err,
                "client unregistered; session stop reported an error",
            ),
            None => tracing::info!(client = %identity, "client unregistered"),
        }
        UnregisterOutcome::Removed {
            identity,
            stop_error,
        }
    }

    /// Unregister every client whose file lives below `dir`.
    ///
    /// Matching paths are collected under the read lock, then each goes
    /// through [`unregister`](Self::unregister) on its own. A path removed
    /// concurrently in between reports `NotRegistered`.
    pub fn unregister_under(&self, dir: &Path) -> Vec<UnregisterOutcome> {
        let mut matched: Vec<PathBuf> = self
            .state
            .read()
            .paths
            .keys()
            .filter(|path| path.as_path() != dir && path.starts_with(dir))
            .cloned()
            .collect();
        matched.sort();
        matched.iter().map(|path| self.unregister(path)).collect()
    }

    pub fn is_registered(&self, identity: &ClientId) -> bool {
        self.state.read().clients.contains_key(identity)
    }

    pub fn identity_for_path(&self, path: &Path) -> Option<ClientId> {
        self.state.read().paths.get(path).cloned()
    }

    pub fn get(&self, identity: &ClientId) -> Option<ClientView> {
        self.state.read().clients.get(identity).map(Entry::view)
    }

    /// Point-in-time copy of every record, sorted by identity.
    pub fn snapshot(&self) -> Vec<ClientView> {
        self.state.read().clients.values().map(Entry::view).collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the registry for shutdown.
    ///
    /// One short write section refuses further registrations, empties both
    /// maps and hands back the sessions (sorted by identity) so the caller
    /// can stop them without holding the lock.
    pub fn close(&self) -> Vec<Session> {
        let mut state = self.state.write();
        state.closed = true;
        state.paths.clear();
        std::mem::take(&mut state.clients)
            .into_values()
            .map(|entry| entry.session)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Test hook: both indexes agree and every record holds a live session.
    #[doc(hidden)]
    pub fn check_invariants(&self) -> Result<(), String> {
        let state = self.state.read();
        if state.clients.len() != state.paths.len() {
            return Err(format!(
                "index sizes differ: {} clients vs {} paths",
                state.clients.len(),
                state.paths.len()
            ));
        }
        for (path, identity) in &state.paths {
            let Some(entry) = state.clients.get(identity) else {
                return Err(format!("dangling path entry {} -> {identity}", path.display()));
            };
            if entry.record.file_path != *path {
                return Err(format!("path index disagrees for {identity}"));
            }
        }
        for (identity, entry) in &state.clients {
            if !entry.session.is_live() {
                return Err(format!("record {identity} has no live session"));
            }
            if entry.session.identity() != identity {
                return Err(format!("session bound to wrong identity for {identity}"));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("adapter", &self.adapter)
            .field("clients", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
