use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use dbfleet_core::{
    identity::default_extensions, ClientId, ClientRegistry, EngineError, RemoteLocator,
    ReplicaHandle, ReplicationEngine, SessionAdapter,
};
use dbfleet_daemon::{Action, FsEvent, Reconciler, WatchState};
use parking_lot::Mutex;
use tempfile::TempDir;

const FIRST: &str = "a1b2c3d4-0000-0000-0000-000000000001";
const SECOND: &str = "a1b2c3d4-0000-0000-0000-000000000002";

#[derive(Default)]
struct Engine {
    opened: AtomicUsize,
    closed: AtomicUsize,
    locked: Mutex<HashSet<PathBuf>>,
    open_delay: Mutex<Duration>,
}

struct Handle(Arc<Engine>);

struct SharedEngine(Arc<Engine>);

impl ReplicationEngine for SharedEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn ReplicaHandle>, EngineError> {
        let delay = *self.0.open_delay.lock();
        std::thread::sleep(delay);
        if self.0.locked.lock().contains(path) {
            return Err("database is locked".into());
        }
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Handle(self.0.clone())))
    }
}

impl ReplicaHandle for Handle {
    fn attach_remote_target(&mut self, _locator: &RemoteLocator) -> Result<(), EngineError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.0.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn reconciler() -> (Reconciler, Arc<Engine>) {
    let engine = Arc::new(Engine::default());
    let adapter = SessionAdapter::new(Arc::new(SharedEngine(engine.clone())), "databases");
    let registry = Arc::new(ClientRegistry::new(adapter));
    (Reconciler::new(registry, default_extensions()), engine)
}

fn touch(path: &Path) {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).expect("mkdir");
    }
    fs::write(path, b"SQLite format 3\0").expect("write");
}

#[test]
fn startup_scan_registers_only_client_files() {
    let dir = TempDir::new().expect("dir");
    touch(&dir.path().join(format!("{FIRST}.db")));
    touch(&dir.path().join("not-a-guid.db"));
    touch(&dir.path().join(format!("{SECOND}.txt")));

    let (reconciler, _) = reconciler();
    let watched = reconciler.prepare(&[dir.path().to_path_buf()]);
    let summary = reconciler.scan(&watched);

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.registered, 1);
    let snapshot = reconciler.registry().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].identity.as_str(), FIRST);
}

#[test]
fn scan_descends_into_subdirectories() {
    let dir = TempDir::new().expect("dir");
    touch(&dir.path().join("tenant-a/2026").join(format!("{FIRST}.sqlite")));
    touch(&dir.path().join("tenant-b").join(format!("{SECOND}.sqlite3")));

    let (reconciler, _) = reconciler();
    let watched = reconciler.prepare(&[dir.path().to_path_buf()]);
    let summary = reconciler.scan(&watched);

    assert_eq!(summary.registered, 2);
    reconciler.registry().check_invariants().expect("invariants");
}

#[test]
fn one_bad_directory_does_not_block_the_others() {
    let good = TempDir::new().expect("good");
    touch(&good.path().join(format!("{FIRST}.db")));
    let missing = good.path().join("does-not-exist");

    let (reconciler, _) = reconciler();
    let watched = reconciler.prepare(&[missing.clone(), good.path().to_path_buf()]);

    assert!(matches!(watched[0].state, WatchState::Failed { .. }));
    assert_eq!(watched[0].path, missing);
    assert_eq!(watched[1].state, WatchState::Watching);
    assert_eq!(reconciler.scan(&watched).registered, 1);
}

#[test]
fn create_then_remove_events_round_trip() {
    let dir = TempDir::new().expect("dir");
    let path = dir.path().join(format!("{FIRST}.db"));
    touch(&path);
    let (reconciler, engine) = reconciler();

    assert!(matches!(reconciler.apply(&FsEvent::create(&path)), Action::Registered(_)));
    let removed = reconciler.apply(&FsEvent::remove(&path));
    assert_eq!(
        removed,
        Action::Unregistered {
            identity: ClientId::parse(FIRST).unwrap()
        }
    );
    assert_eq!(reconciler.apply(&FsEvent::remove(&path)), Action::NotRegistered);
    assert_eq!(engine.closed.load(Ordering::SeqCst), 1);
    assert!(reconciler.registry().is_empty());
}

#[test]
fn rename_moves_registration_to_new_name() {
    let dir = TempDir::new().expect("dir");
    let old = dir.path().join(format!("{FIRST}.db"));
    let new = dir.path().join(format!("{SECOND}.db"));
    touch(&old);
    let (reconciler, _) = reconciler();
    reconciler.apply(&FsEvent::create(&old));

    fs::rename(&old, &new).expect("rename");
    for event in [FsEvent::remove(&old), FsEvent::create(&new)] {
        reconciler.apply(&event);
    }

    let snapshot = reconciler.registry().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].identity.as_str(), SECOND);
}

#[test]
fn scan_and_create_event_race_converges_to_one_session() {
    let dir = TempDir::new().expect("dir");
    let path = dir.path().join(format!("{FIRST}.db"));
    touch(&path);

    let (reconciler, engine) = reconciler();
    *engine.open_delay.lock() = Duration::from_millis(30);
    let reconciler = Arc::new(reconciler);
    let watched = reconciler.prepare(&[dir.path().to_path_buf()]);
    let canonical = watched[0].path.join(format!("{FIRST}.db"));

    let barrier = Arc::new(Barrier::new(2));
    let scanner = {
        let reconciler = reconciler.clone();
        let barrier = barrier.clone();
        std::thread::spawn(move || {
            barrier.wait();
            reconciler.scan(&watched)
        })
    };
    barrier.wait();
    let event_action = reconciler.apply(&FsEvent::create(&canonical));
    let summary = scanner.join().expect("scanner");

    let registered =
        usize::from(matches!(event_action, Action::Registered(_))) + summary.registered;
    let duplicates =
        usize::from(matches!(event_action, Action::Duplicate { .. })) + summary.duplicates;
    assert_eq!(registered, 1);
    assert_eq!(duplicates, 1);
    assert_eq!(engine.opened.load(Ordering::SeqCst), 1);
    assert_eq!(reconciler.registry().len(), 1);
}

#[test]
fn open_failure_leaves_client_absent_until_a_later_create() {
    let dir = TempDir::new().expect("dir");
    let path = dir.path().join(format!("{FIRST}.db"));
    touch(&path);
    let (reconciler, engine) = reconciler();
    engine.locked.lock().insert(path.clone());

    assert!(matches!(reconciler.apply(&FsEvent::create(&path)), Action::Failed { .. }));
    assert!(reconciler.registry().snapshot().is_empty());

    engine.locked.lock().remove(&path);
    assert!(matches!(reconciler.apply(&FsEvent::create(&path)), Action::Registered(_)));
    assert_eq!(reconciler.registry().len(), 1);
}

#[test]
fn disallowed_extension_is_ignored_before_identity() {
    let (reconciler, engine) = reconciler();
    let action = reconciler.apply(&FsEvent::create(format!("/data/{FIRST}.wal")));
    assert_eq!(action, Action::Ignored);
    assert_eq!(engine.opened.load(Ordering::SeqCst), 0);
}

#[test]
fn directory_moved_out_drops_every_client_below_it() {
    let root = TempDir::new().expect("root");
    let outside = TempDir::new().expect("outside");
    let tenant = root.path().join("tenant");
    touch(&tenant.join(format!("{FIRST}.db")));
    touch(&tenant.join("nested").join(format!("{SECOND}.db")));

    let (reconciler, engine) = reconciler();
    let watched = reconciler.prepare(&[root.path().to_path_buf()]);
    assert_eq!(reconciler.scan(&watched).registered, 2);

    let tenant = watched[0].path.join("tenant");
    fs::rename(&tenant, outside.path().join("tenant")).expect("move out");
    let action = reconciler.apply(&FsEvent::remove(&tenant));

    match action {
        Action::SubtreeRemoved { identities } => assert_eq!(identities.len(), 2),
        other => panic!("unexpected action: {other:?}"),
    }
    assert!(reconciler.registry().snapshot().is_empty());
    assert_eq!(engine.closed.load(Ordering::SeqCst), 2);
    reconciler.registry().check_invariants().expect("invariants");
}

#[test]
fn directory_moved_in_is_scanned() {
    let root = TempDir::new().expect("root");
    let staging = TempDir::new().expect("staging");
    touch(&staging.path().join("tenant").join(format!("{FIRST}.db")));
    touch(&staging.path().join("tenant/notes.txt"));

    let (reconciler, _) = reconciler();
    let watched = reconciler.prepare(&[root.path().to_path_buf()]);
    assert_eq!(reconciler.scan(&watched).registered, 0);

    let tenant = watched[0].path.join("tenant");
    fs::rename(staging.path().join("tenant"), &tenant).expect("move in");
    match reconciler.apply(&FsEvent::create(&tenant)) {
        Action::SubtreeScanned(summary) => {
            assert_eq!(summary.discovered, 2);
            assert_eq!(summary.registered, 1);
        }
        other => panic!("unexpected action: {other:?}"),
    }

    let snapshot = reconciler.registry().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].file_path, tenant.join(format!("{FIRST}.db")));
}

#[test]
fn directory_renamed_in_place_follows_the_new_path() {
    use dbfleet_daemon::translate;
    use notify::event::{ModifyKind, RenameMode};
    use notify::{Event, EventKind};

    let root = TempDir::new().expect("root");
    touch(&root.path().join("old").join(format!("{FIRST}.db")));

    let (reconciler, engine) = reconciler();
    let watched = reconciler.prepare(&[root.path().to_path_buf()]);
    reconciler.scan(&watched);

    let old = watched[0].path.join("old");
    let new = watched[0].path.join("new");
    fs::rename(&old, &new).expect("rename");
    let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
        .add_path(old.clone())
        .add_path(new.clone());
    for fs_event in translate(&event) {
        reconciler.apply(&fs_event);
    }

    let snapshot = reconciler.registry().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].identity.as_str(), FIRST);
    assert_eq!(snapshot[0].file_path, new.join(format!("{FIRST}.db")));
    assert_eq!(engine.opened.load(Ordering::SeqCst), 2);
    assert_eq!(engine.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn removing_an_unrelated_file_changes_nothing() {
    let dir = TempDir::new().expect("dir");
    touch(&dir.path().join(format!("{FIRST}.db")));
    let (reconciler, _) = reconciler();
    let watched = reconciler.prepare(&[dir.path().to_path_buf()]);
    reconciler.scan(&watched);

    let action = reconciler.apply(&FsEvent::remove(watched[0].path.join("notes.txt")));
    assert_eq!(action, Action::Ignored);
    assert_eq!(reconciler.registry().len(), 1);
}

#[cfg(unix)]
#[test]
fn read_only_directory_is_not_writable() {
    use dbfleet_daemon::{probe_directory, ReconcileError, ScanSummary};
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().expect("tmp");
    let dir = tmp.path().join("read-only");
    fs::create_dir(&dir).expect("mkdir");
    fs::set_permissions(&dir, fs::Permissions::from_mode(0o555)).expect("chmod");
    let restore = || fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).expect("chmod");

    // Root ignores mode bits; nothing to assert there.
    if fs::File::create(dir.join("write-check")).is_ok() {
        restore();
        return;
    }

    let err = probe_directory(&dir).unwrap_err();
    assert!(matches!(err, ReconcileError::NotWritable { .. }), "got: {err}");

    let (reconciler, _) = reconciler();
    let watched = reconciler.prepare(&[dir.clone()]);
    match &watched[0].state {
        WatchState::Failed { reason } => assert!(reason.contains("not writable"), "got: {reason}"),
        other => panic!("unexpected state: {other:?}"),
    }
    assert_eq!(reconciler.scan(&watched), ScanSummary::default());
    restore();
}
