//! Recording replication engine shared by the registry integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dbfleet_core::{
    ClientRegistry, EngineError, RemoteLocator, ReplicaHandle, ReplicationEngine, SessionAdapter,
};
use parking_lot::Mutex;

#[derive(Default)]
pub struct EngineLog {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub attached: Mutex<Vec<String>>,
    pub locked: Mutex<HashSet<PathBuf>>,
    pub failing_close: Mutex<HashSet<PathBuf>>,
}

impl EngineLog {
    pub fn live(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }

    pub fn lock(&self, path: &Path) {
        self.locked.lock().insert(path.to_path_buf());
    }

    pub fn unlock(&self, path: &Path) {
        self.locked.lock().remove(path);
    }
}

pub struct RecordingEngine {
    pub log: Arc<EngineLog>,
    pub open_delay: Duration,
}

struct RecordingHandle {
    log: Arc<EngineLog>,
    path: PathBuf,
}

impl ReplicationEngine for RecordingEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn ReplicaHandle>, EngineError> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        if self.log.locked.lock().contains(path) {
            return Err(format!("database is locked: {}", path.display()).into());
        }
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingHandle {
            log: self.log.clone(),
            path: path.to_path_buf(),
        }))
    }
}

impl ReplicaHandle for RecordingHandle {
    fn attach_remote_target(&mut self, locator: &RemoteLocator) -> Result<(), EngineError> {
        self.log.attached.lock().push(locator.to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        if self.log.failing_close.lock().contains(&self.path) {
            return Err("flush interrupted".into());
        }
        Ok(())
    }
}

pub fn registry_with_delay(delay: Duration) -> (Arc<ClientRegistry>, Arc<EngineLog>) {
    let log = Arc::new(EngineLog::default());
    let engine = RecordingEngine {
        log: log.clone(),
        open_delay: delay,
    };
    let adapter = SessionAdapter::new(Arc::new(engine), "databases");
    (Arc::new(ClientRegistry::new(adapter)), log)
}

pub fn registry() -> (Arc<ClientRegistry>, Arc<EngineLog>) {
    registry_with_delay(Duration::ZERO)
}

/// `/data/<n as id>.db`, e.g. `00000000-0000-0000-0000-000000000007.db`.
pub fn client_path(n: u32) -> PathBuf {
    PathBuf::from(format!("/data/{:08x}-0000-0000-0000-{:012x}.db", n, n))
}
