//! Filesystem replication engine.
//!
//! Each attached handle owns one worker thread that snapshots the source
//! database every `interval`. `close` signals the worker, which takes one
//! final snapshot (the drain) before exiting; `close` joins it.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use dbfleet_core::{EngineError, FleetConfig, RemoteLocator, ReplicaHandle, ReplicationEngine};

use crate::error::{io_err, ReplicaError};
use crate::manifest::{self, Manifest};
use crate::snapshot::{take_snapshot, SnapshotResult};

/// Engine writing replicas under a local root directory.
#[derive(Debug, Clone)]
pub struct FsReplicaEngine {
    root: PathBuf,
    interval: Duration,
    retain: usize,
}

impl FsReplicaEngine {
    pub fn new(root: impl Into<PathBuf>, interval: Duration, retain: usize) -> Self {
        Self {
            root: root.into(),
            interval,
            retain: retain.max(1),
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(
            config.replica_root.clone(),
            config.snapshot_interval(),
            config.retain_snapshots,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ReplicationEngine for FsReplicaEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn ReplicaHandle>, EngineError> {
        let meta = std::fs::metadata(path).map_err(|e| io_err(path, e))?;
        if !meta.is_file() {
            return Err(ReplicaError::NotAFile {
                path: path.to_path_buf(),
            }
            .into());
        }
        // Readability check; the worker reopens on every snapshot.
        File::open(path).map_err(|e| io_err(path, e))?;

        tracing::debug!(path = %path.display(), "replica handle opened");
        Ok(Box::new(FsReplicaHandle {
            source: path.to_path_buf(),
            root: self.root.clone(),
            interval: self.interval,
            retain: self.retain,
            worker: None,
        }))
    }
}

struct Worker {
    locator: RemoteLocator,
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// One open replication job for a single database file.
pub struct FsReplicaHandle {
    source: PathBuf,
    root: PathBuf,
    interval: Duration,
    retain: usize,
    worker: Option<Worker>,
}

impl FsReplicaHandle {
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn is_attached(&self) -> bool {
        self.worker.is_some()
    }

    fn attach(&mut self, locator: &RemoteLocator) -> Result<(), ReplicaError> {
        if let Some(worker) = &self.worker {
            return Err(ReplicaError::AlreadyAttached {
                locator: worker.locator.to_string(),
            });
        }

        let target = manifest::target_dir(&self.root, locator);
        let mut manifest = manifest::load(&target, locator)?;
        // Initial snapshot runs inline so an unwritable target fails the attach.
        take_snapshot(&self.source, &target, &mut manifest, self.retain)?;

        let (stop, stop_rx) = mpsc::channel();
        let job = SnapshotJob {
            source: self.source.clone(),
            target,
            manifest,
            retain: self.retain,
        };
        let interval = self.interval;
        let thread = std::thread::Builder::new()
            .name(format!("replica:{}", locator))
            .spawn(move || job.run(interval, stop_rx))
            .map_err(|e| io_err(&self.source, e))?;

        tracing::info!(
            source = %self.source.display(),
            remote = %locator,
            "replication attached",
        );
        self.worker = Some(Worker {
            locator: locator.clone(),
            stop,
            thread,
        });
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), ReplicaError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        // A send error means the worker already exited; join reports why.
        let _ = worker.stop.send(());
        worker
            .thread
            .join()
            .map_err(|_| ReplicaError::WorkerPanicked {
                source_path: self.source.clone(),
            })?;
        tracing::info!(source = %self.source.display(), remote = %worker.locator, "replication stopped");
        Ok(())
    }
}

impl ReplicaHandle for FsReplicaHandle {
    fn attach_remote_target(&mut self, locator: &RemoteLocator) -> Result<(), EngineError> {
        self.attach(locator).map_err(Into::into)
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.shutdown().map_err(Into::into)
    }
}

impl std::fmt::Debug for FsReplicaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsReplicaHandle")
            .field("source", &self.source)
            .field("attached", &self.is_attached())
            .finish()
    }
}

struct SnapshotJob {
    source: PathBuf,
    target: PathBuf,
    manifest: Manifest,
    retain: usize,
}

impl SnapshotJob {
    fn run(mut self, interval: Duration, stop: mpsc::Receiver<()>) {
        loop {
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => self.tick(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // Drain: capture whatever was written since the last tick.
        self.tick();
    }

    fn tick(&mut self) {
        match take_snapshot(&self.source, &self.target, &mut self.manifest, self.retain) {
            Ok(SnapshotResult::SourceMissing) => {
                tracing::debug!(source = %self.source.display(), "source missing; snapshot skipped");
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(
                source = %self.source.display(),
                error = %err,
                "snapshot failed",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbfleet_core::ClientId;
    use tempfile::TempDir;

    fn locator() -> RemoteLocator {
        let id = ClientId::parse("a1b2c3d4-0000-0000-0000-000000000001").unwrap();
        RemoteLocator::for_client("databases", &id)
    }

    #[test]
    fn open_rejects_directory() {
        let dir = TempDir::new().unwrap();
        let engine = FsReplicaEngine::new(dir.path().join("replica"), Duration::from_secs(60), 3);
        let err = engine.open(dir.path()).err().unwrap();
        assert!(err.to_string().contains("not a regular file"), "got: {err}");
    }

    #[test]
    fn open_rejects_missing_file() {
        let dir = TempDir::new().unwrap();
        let engine = FsReplicaEngine::new(dir.path().join("replica"), Duration::from_secs(60), 3);
        assert!(engine.open(&dir.path().join("absent.db")).is_err());
    }

    #[test]
    fn second_attach_is_refused() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("x.db");
        std::fs::write(&source, b"data").unwrap();
        let engine = FsReplicaEngine::new(dir.path().join("replica"), Duration::from_secs(60), 3);

        let mut handle = engine.open(&source).unwrap();
        handle.attach_remote_target(&locator()).unwrap();
        let err = handle.attach_remote_target(&locator()).unwrap_err();
        assert!(err.to_string().contains("already attached"), "got: {err}");
        handle.close().unwrap();
    }

    #[test]
    fn close_without_attach_is_ok() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("x.db");
        std::fs::write(&source, b"data").unwrap();
        let engine = FsReplicaEngine::new(dir.path().join("replica"), Duration::from_secs(60), 3);
        let mut handle = engine.open(&source).unwrap();
        handle.close().unwrap();
        handle.close().unwrap();
    }
}
