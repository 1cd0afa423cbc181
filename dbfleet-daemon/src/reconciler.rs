//! Reconciler: keeps the registry in step with the watched directories.
//!
//! Two inputs feed it. The startup scan walks every `Watching` directory once;
//! the live stream delivers create/remove events from the filesystem watcher.
//! Both call the same [`Reconciler::apply`], and because a second `register`
//! for a live identity is refused as a duplicate, a file seen by both paths
//! ends up registered exactly once regardless of which arrives first.
//!
//! Directories moving in or out of a watched tree arrive as a single event
//! for the directory itself. A directory create rescans that subtree; a
//! removal of any non-client path drops every record below it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};
use serde::Serialize;

use dbfleet_core::{
    is_database_file, ClientId, ClientRegistry, ClientView, RegisterError, RegisterOutcome,
    UnregisterOutcome,
};

use crate::error::ReconcileError;
use crate::paths::ACCESS_PROBE_FILE;

// ---------------------------------------------------------------------------
// Watch directories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WatchState {
    Unwatched,
    Watching,
    Failed { reason: String },
}

/// One configured directory and where it stands.
///
/// `path` is the canonical path once the directory is `Watching`, and the
/// configured path otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchedDir {
    pub path: PathBuf,
    #[serde(flatten)]
    pub state: WatchState,
}

impl WatchedDir {
    pub fn is_watching(&self) -> bool {
        self.state == WatchState::Watching
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = WatchState::Failed {
            reason: reason.into(),
        };
    }
}

/// Check that `dir` exists, is a directory and is writable.
///
/// Writability is proven by creating and deleting a probe file. Returns the
/// canonical path so scan results and watcher events share one prefix.
pub fn probe_directory(dir: &Path) -> Result<PathBuf, ReconcileError> {
    let meta = match fs::metadata(dir) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ReconcileError::Missing {
                path: dir.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ReconcileError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };
    if !meta.is_dir() {
        return Err(ReconcileError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let probe = dir.join(ACCESS_PROBE_FILE);
    let not_writable = |source| ReconcileError::NotWritable {
        path: dir.to_path_buf(),
        source,
    };
    fs::File::create(&probe).map_err(not_writable)?;
    fs::remove_file(&probe).map_err(not_writable)?;

    fs::canonicalize(dir).map_err(|source| ReconcileError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Events and actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Create,
    Remove,
}

/// The only two filesystem facts the reconciler acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

impl FsEvent {
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Create,
            path: path.into(),
        }
    }

    pub fn remove(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Remove,
            path: path.into(),
        }
    }
}

/// Map a raw watcher event onto create/remove events.
///
/// Renames become remove(old) + create(new). Content and metadata changes
/// map to nothing: the replication session snapshots content on its own.
pub fn translate(event: &Event) -> Vec<FsEvent> {
    let paths = &event.paths;
    match &event.kind {
        EventKind::Create(_) => paths.iter().map(FsEvent::create).collect(),
        EventKind::Remove(_) => paths.iter().map(FsEvent::remove).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().map(FsEvent::remove).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.iter().map(FsEvent::create).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match paths.as_slice() {
            [from, to] => vec![FsEvent::remove(from), FsEvent::create(to)],
            _ => Vec::new(),
        },
        // FSEvents reports renames without a direction; existence decides.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => paths
            .iter()
            .map(|path| {
                if path.exists() {
                    FsEvent::create(path)
                } else {
                    FsEvent::remove(path)
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// What applying one [`FsEvent`] did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Registered(ClientView),
    /// Lost a register race; discarded.
    Duplicate { identity: ClientId },
    Unregistered { identity: ClientId },
    /// Remove for a path that was not registered.
    NotRegistered,
    /// Not a client database (extension or file name).
    Ignored,
    Failed { reason: String },
    /// A directory appeared; its subtree was walked like a startup scan.
    SubtreeScanned(ScanSummary),
    /// A directory left the tree; every client below it was unregistered.
    SubtreeRemoved { identities: Vec<ClientId> },
}

/// Counters for one startup scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Regular files visited.
    pub discovered: usize,
    pub registered: usize,
    pub duplicates: usize,
    pub ignored: usize,
    pub failed: usize,
}

impl ScanSummary {
    fn record(&mut self, action: &Action) {
        match action {
            Action::Registered(_) => self.registered += 1,
            Action::Duplicate { .. } => self.duplicates += 1,
            Action::Failed { .. } => self.failed += 1,
            Action::SubtreeScanned(inner) => {
                self.discovered += inner.discovered;
                self.registered += inner.registered;
                self.duplicates += inner.duplicates;
                self.ignored += inner.ignored;
                self.failed += inner.failed;
            }
            Action::Ignored
            | Action::NotRegistered
            | Action::Unregistered { .. }
            | Action::SubtreeRemoved { .. } => self.ignored += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler {
    registry: Arc<ClientRegistry>,
    extensions: Vec<String>,
}

impl Reconciler {
    pub fn new(registry: Arc<ClientRegistry>, extensions: Vec<String>) -> Self {
        Self {
            registry,
            extensions,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Probe every configured directory. A failure only affects its own entry.
    pub fn prepare(&self, dirs: &[PathBuf]) -> Vec<WatchedDir> {
        dirs.iter()
            .map(|dir| {
                let mut watched = WatchedDir {
                    path: dir.clone(),
                    state: WatchState::Unwatched,
                };
                match probe_directory(dir) {
                    Ok(canonical) => {
                        tracing::info!(dir = %canonical.display(), "watch directory ready");
                        watched.path = canonical;
                        watched.state = WatchState::Watching;
                    }
                    Err(err) => {
                        tracing::error!(dir = %dir.display(), error = %err, "watch directory unavailable");
                        watched.fail(err.to_string());
                    }
                }
                watched
            })
            .collect()
    }

    /// Walk every `Watching` directory and register what it holds.
    ///
    /// Unreadable directories and entries are logged and skipped.
    pub fn scan(&self, dirs: &[WatchedDir]) -> ScanSummary {
        let mut summary = ScanSummary::default();
        for dir in dirs.iter().filter(|d| d.is_watching()) {
            self.walk(&dir.path, &mut summary);
        }
        tracing::info!(
            discovered = summary.discovered,
            registered = summary.registered,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "startup scan complete",
        );
        summary
    }

    fn walk(&self, root: &Path, summary: &mut ScanSummary) {
        let mut pending = vec![root.to_path_buf()];
        while let Some(current) = pending.pop() {
            let entries = match fs::read_dir(&current) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(dir = %current.display(), error = %err, "scan: cannot read directory");
                    continue;
                }
            };
            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        tracing::warn!(dir = %current.display(), error = %err, "scan: cannot read entry");
                        continue;
                    }
                };
                let path = entry.path();
                match entry.file_type() {
                    Ok(kind) if kind.is_dir() => pending.push(path),
                    Ok(kind) if kind.is_file() => {
                        summary.discovered += 1;
                        let action = self.on_file_create(&path);
                        summary.record(&action);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "scan: cannot stat entry");
                    }
                }
            }
        }
    }

    /// Apply one event to the registry. Never fails; failures become
    /// [`Action::Failed`] after being logged.
    pub fn apply(&self, event: &FsEvent) -> Action {
        let path = event.path.as_path();
        match event.kind {
            FsEventKind::Create if path.is_dir() => self.on_dir_create(path),
            FsEventKind::Create => self.on_file_create(path),
            FsEventKind::Remove => {
                let client_file = is_database_file(path, &self.extensions);
                if client_file {
                    if let action @ Action::Unregistered { .. } = self.on_remove(path) {
                        return action;
                    }
                }
                // The path may have been a directory; it no longer exists to ask.
                match self.on_subtree_remove(path) {
                    Action::Ignored if client_file => Action::NotRegistered,
                    action => action,
                }
            }
        }
    }

    fn on_file_create(&self, path: &Path) -> Action {
        if !is_database_file(path, &self.extensions) {
            return Action::Ignored;
        }
        self.on_create(path)
    }

    fn on_dir_create(&self, dir: &Path) -> Action {
        let mut summary = ScanSummary::default();
        self.walk(dir, &mut summary);
        tracing::info!(
            dir = %dir.display(),
            discovered = summary.discovered,
            registered = summary.registered,
            "directory entered watch tree",
        );
        Action::SubtreeScanned(summary)
    }

    fn on_subtree_remove(&self, dir: &Path) -> Action {
        let identities: Vec<ClientId> = self
            .registry
            .unregister_under(dir)
            .into_iter()
            .filter_map(|outcome| match outcome {
                UnregisterOutcome::Removed { identity, .. } => Some(identity),
                UnregisterOutcome::NotRegistered => None,
            })
            .collect();
        if identities.is_empty() {
            return Action::Ignored;
        }
        tracing::info!(
            dir = %dir.display(),
            clients = identities.len(),
            "directory left watch tree",
        );
        Action::SubtreeRemoved { identities }
    }

    fn on_create(&self, path: &Path) -> Action {
        match self.registry.register(path) {
            Ok(RegisterOutcome::Registered(view)) => Action::Registered(view),
            Ok(RegisterOutcome::NotAClient) => Action::Ignored,
            Err(RegisterError::AlreadyRegistered { identity, path: live }) => {
                tracing::debug!(
                    path = %path.display(),
                    client = %identity,
                    live_path = %live.display(),
                    "discarding duplicate registration",
                );
                Action::Duplicate { identity }
            }
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "registration failed");
                Action::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn on_remove(&self, path: &Path) -> Action {
        match self.registry.unregister(path) {
            UnregisterOutcome::Removed { identity, .. } => Action::Unregistered { identity },
            UnregisterOutcome::NotRegistered => Action::NotRegistered,
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("extensions", &self.extensions)
            .field("clients", &self.registry.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
