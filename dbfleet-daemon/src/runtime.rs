use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use dbfleet_core::{ClientId, ClientRegistry, FleetConfig, SessionAdapter};
use dbfleet_replica::{list_snapshots, FsReplicaEngine};

use crate::error::{io_err, DaemonError};
use crate::paths::{fleet_root, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::reconciler::{translate, Reconciler, ScanSummary, WatchedDir};

/// Read-only state shared with socket clients.
#[derive(Clone)]
pub struct StatusContext {
    pub registry: Arc<ClientRegistry>,
    pub watched: Arc<Vec<WatchedDir>>,
    pub config: Arc<FleetConfig>,
    pub started_at_unix: u64,
}

/// Counters from the shutdown drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub stopped: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, config: FleetConfig) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let result = runtime.block_on(run(home.to_path_buf(), config));
    // Stops that exceeded their timeout are still parked on the blocking pool.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

/// Run the daemon until a signal or a `stop` request arrives.
pub async fn run(home: PathBuf, config: FleetConfig) -> Result<(), DaemonError> {
    let config = config.with_home_defaults(&home);
    config.validate()?;
    ensure_runtime_dirs(&home, &config)?;

    let engine = FsReplicaEngine::from_config(&config);
    let adapter = SessionAdapter::new(Arc::new(engine), config.remote_root.clone());
    let registry = Arc::new(ClientRegistry::new(adapter));
    let reconciler = Arc::new(Reconciler::new(
        registry.clone(),
        config.extensions.clone(),
    ));

    let mut watched = reconciler.prepare(&config.watch_dirs);
    let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    subscribe(&mut watcher, &mut watched);
    if !watched.iter().any(WatchedDir::is_watching) {
        tracing::warn!("no watch directory is available; only the status socket will serve");
    }
    let watched = Arc::new(watched);

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let event_handle = {
        let reconciler = reconciler.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(event_task(reconciler, event_rx, shutdown_rx))
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(signal_task(shutdown, shutdown_rx))
    };
    // Subscribed before the scan so a signal during it still reaches the server.
    let socket_shutdown_rx = shutdown_tx.subscribe();

    let summary = {
        let reconciler = reconciler.clone();
        let watched = watched.clone();
        tokio::task::spawn_blocking(move || reconciler.scan(&watched))
            .await
            .map_err(|err| DaemonError::Protocol(format!("startup scan join error: {err}")))?
    };
    log_scan_summary(&summary, registry.len());

    let context = StatusContext {
        registry: registry.clone(),
        watched,
        config: Arc::new(config.clone()),
        started_at_unix: unix_seconds_now(),
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(home, context, shutdown.clone(), socket_shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let (event_result, socket_result, signal_result) =
        tokio::join!(event_handle, socket_handle, signal_handle);

    // Events are no longer consumed; release the subscription before draining.
    drop(watcher);
    let drained = drain_sessions(&registry, config.stop_timeout()).await;
    tracing::info!(
        stopped = drained.stopped,
        failed = drained.failed,
        timed_out = drained.timed_out,
        "daemon stopped",
    );

    handle_join("event_processor", event_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Watch every `Watching` directory recursively. A directory the watcher
/// refuses is marked failed; the rest carry on.
fn subscribe(watcher: &mut RecommendedWatcher, watched: &mut [WatchedDir]) {
    for dir in watched.iter_mut().filter(|d| d.is_watching()) {
        match watcher.watch(&dir.path, RecursiveMode::Recursive) {
            Ok(()) => tracing::info!(dir = %dir.path.display(), "watching directory"),
            Err(err) => {
                tracing::error!(dir = %dir.path.display(), error = %err, "failed to watch directory");
                dir.fail(err.to_string());
            }
        }
    }
}

/// Drain watcher events in arrival order until shutdown. Watcher errors are
/// logged and skipped.
pub(crate) async fn event_task(
    reconciler: Arc<Reconciler>,
    mut event_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                let fs_events = translate(&event);
                if fs_events.is_empty() {
                    continue;
                }
                let reconciler = reconciler.clone();
                tokio::task::spawn_blocking(move || {
                    for fs_event in &fs_events {
                        let action = reconciler.apply(fs_event);
                        tracing::debug!(path = %fs_event.path.display(), ?action, "event applied");
                    }
                })
                .await
                .map_err(|err| DaemonError::Protocol(format!("event task join error: {err}")))?;
            }
        }
    }
    Ok(())
}

async fn signal_task(
    shutdown: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM, shutting down daemon");
            let _ = shutdown.send(());
            Ok(())
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    tracing::info!("received ctrl-c, shutting down daemon");
                    let _ = shutdown.send(());
                    Ok(())
                }
                Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
            }
        }
    }
}

/// Close the registry and stop every session outside its lock, each bounded
/// by `timeout`. A stop that overruns is logged and abandoned.
pub async fn drain_sessions(registry: &Arc<ClientRegistry>, timeout: Duration) -> DrainSummary {
    let sessions = registry.close();
    let mut summary = DrainSummary::default();
    if sessions.is_empty() {
        return summary;
    }
    tracing::info!(sessions = sessions.len(), "draining replication sessions");

    let mut stops = JoinSet::new();
    for mut session in sessions {
        let adapter = registry.adapter().clone();
        stops.spawn(async move {
            let identity = session.identity().clone();
            let stop = tokio::task::spawn_blocking(move || adapter.stop(&mut session));
            (identity, tokio::time::timeout(timeout, stop).await)
        });
    }

    while let Some(joined) = stops.join_next().await {
        match joined {
            Ok((_, Ok(Ok(Ok(()))))) => summary.stopped += 1,
            Ok((identity, Ok(Ok(Err(err))))) => {
                tracing::warn!(client = %identity, error = %err, "session stop failed");
                summary.failed += 1;
            }
            Ok((identity, Ok(Err(err)))) => {
                tracing::error!(client = %identity, error = %err, "session stop panicked");
                summary.failed += 1;
            }
            Ok((identity, Err(_))) => {
                tracing::warn!(
                    client = %identity,
                    timeout_ms = timeout.as_millis() as u64,
                    "session stop timed out; abandoning",
                );
                summary.timed_out += 1;
            }
            Err(err) => {
                tracing::error!(error = %err, "session stop task failed");
                summary.failed += 1;
            }
        }
    }
    summary
}

async fn socket_server_task(
    home: PathBuf,
    context: StatusContext,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "status socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let context = context.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, context, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    context: StatusContext,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&context, unix_seconds_now())),
            "client" => client_response(&context, request.client.as_deref()).await,
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

/// Status JSON. Client data comes only from `registry.snapshot()`.
pub fn build_status_payload(context: &StatusContext, now_unix: u64) -> Value {
    let clients = context.registry.snapshot();
    let uptime = now_unix.saturating_sub(context.started_at_unix);
    json!({
        "running": true,
        "started_at_unix": context.started_at_unix,
        "uptime": format_uptime(uptime),
        "replica_root": context.config.replica_root.display().to_string(),
        "remote_root": context.config.remote_root,
        "watch_dirs": context.watched.as_slice(),
        "watch_dir_count": context.watched.len(),
        "watching_count": context.watched.iter().filter(|d| d.is_watching()).count(),
        "total_clients": clients.len(),
        // Every record holds a live session.
        "active_clients": clients.len(),
        "clients": clients,
    })
}

async fn client_response(context: &StatusContext, raw: Option<&str>) -> DaemonResponse {
    let Some(raw) = raw else {
        return DaemonResponse::error("client identifier required");
    };
    let identity = match raw.parse::<ClientId>() {
        Ok(identity) => identity,
        Err(err) => return DaemonResponse::error(err.to_string()),
    };
    let Some(view) = context.registry.get(&identity) else {
        return DaemonResponse::error("client not found");
    };

    let root = context.config.replica_root.clone();
    let locator = view.remote_locator.clone();
    let snapshots = match tokio::task::spawn_blocking(move || list_snapshots(&root, &locator)).await
    {
        Ok(Ok(snapshots)) => snapshots,
        Ok(Err(err)) => return DaemonResponse::error(err.to_string()),
        Err(err) => return DaemonResponse::error(format!("snapshot listing failed: {err}")),
    };

    let mut payload = json!(view);
    payload["snapshots"] = json!(snapshots);
    DaemonResponse::ok(payload)
}

/// Compact uptime: `45s`, `3m`, `2h 5m`, `1d 4h`.
pub fn format_uptime(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    match seconds {
        s if s < MINUTE => format!("{s}s"),
        s if s < HOUR => format!("{}m", s / MINUTE),
        s if s < DAY => format!("{}h {}m", s / HOUR, (s % HOUR) / MINUTE),
        s => format!("{}d {}h", s / DAY, (s % DAY) / HOUR),
    }
}

fn log_scan_summary(summary: &ScanSummary, clients: usize) {
    tracing::info!(
        clients,
        failed = summary.failed,
        "monitoring clients",
    );
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path, config: &FleetConfig) -> Result<(), DaemonError> {
    for dir in [fleet_root(home), config.replica_root.clone()] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the global `tracing` subscriber (`RUST_LOG`, default `info`).
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbfleet_core::{EngineError, RemoteLocator, ReplicaHandle, ReplicationEngine};
    use tempfile::TempDir;

    use crate::reconciler::WatchState;

    struct SlowEngine {
        close_delay: Duration,
    }

    struct SlowHandle {
        close_delay: Duration,
    }

    impl ReplicationEngine for SlowEngine {
        fn open(&self, _path: &Path) -> Result<Box<dyn ReplicaHandle>, EngineError> {
            Ok(Box::new(SlowHandle {
                close_delay: self.close_delay,
            }))
        }
    }

    impl ReplicaHandle for SlowHandle {
        fn attach_remote_target(&mut self, _locator: &RemoteLocator) -> Result<(), EngineError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), EngineError> {
            std::thread::sleep(self.close_delay);
            Ok(())
        }
    }

    fn registry(close_delay: Duration) -> Arc<ClientRegistry> {
        let adapter = SessionAdapter::new(Arc::new(SlowEngine { close_delay }), "databases");
        Arc::new(ClientRegistry::new(adapter))
    }

    fn client_path(n: u32) -> PathBuf {
        PathBuf::from(format!("/data/{n:08x}-0000-0000-0000-000000000000.db"))
    }

    #[test]
    fn uptime_formats_match_dashboard() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(3 * 60 + 5), "3m");
        assert_eq!(format_uptime(2 * 3600 + 5 * 60), "2h 5m");
        assert_eq!(format_uptime(28 * 3600), "1d 4h");
    }

    #[test]
    fn status_payload_reflects_snapshot() {
        let registry = registry(Duration::ZERO);
        registry.register(&client_path(2)).unwrap();
        registry.register(&client_path(1)).unwrap();
        let context = StatusContext {
            registry: registry.clone(),
            watched: Arc::new(vec![
                WatchedDir {
                    path: PathBuf::from("/data"),
                    state: WatchState::Watching,
                },
                WatchedDir {
                    path: PathBuf::from("/gone"),
                    state: WatchState::Failed {
                        reason: "missing".to_string(),
                    },
                },
            ]),
            config: Arc::new(FleetConfig {
                replica_root: PathBuf::from("/replica"),
                ..FleetConfig::default()
            }),
            started_at_unix: 1_000,
        };

        let payload = build_status_payload(&context, 1_000 + 3_700);
        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["uptime"], json!("1h 1m"));
        assert_eq!(payload["total_clients"], json!(2));
        assert_eq!(payload["active_clients"], json!(2));
        assert_eq!(payload["watch_dir_count"], json!(2));
        assert_eq!(payload["watching_count"], json!(1));
        assert_eq!(payload["remote_root"], json!("databases"));
        assert_eq!(
            payload["clients"][0]["clientId"],
            json!("00000001-0000-0000-0000-000000000000")
        );
        assert_eq!(
            payload["clients"][0]["remotePath"],
            json!("databases/00000001-0000-0000-0000-000000000000")
        );
        assert_eq!(payload["watch_dirs"][1]["state"], json!("failed"));
        assert_eq!(payload["watch_dirs"][1]["reason"], json!("missing"));
        assert!(payload["watch_dirs"][0].get("reason").is_none());
        for mut session in registry.close() {
            registry.adapter().stop(&mut session).unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drain_stops_every_session_and_closes_registry() {
        let registry = registry(Duration::ZERO);
        for n in 0..4 {
            registry.register(&client_path(n)).unwrap();
        }

        let summary = drain_sessions(&registry, Duration::from_secs(5)).await;
        assert_eq!(summary.stopped, 4);
        assert_eq!(summary.timed_out, 0);
        assert!(registry.is_empty());
        assert!(registry.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drain_abandons_sessions_that_overrun() {
        let registry = registry(Duration::from_millis(500));
        registry.register(&client_path(1)).unwrap();

        let started = std::time::Instant::now();
        let summary = drain_sessions(&registry, Duration::from_millis(50)).await;
        assert_eq!(summary.timed_out, 1);
        assert!(started.elapsed() < Duration::from_millis(450));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn watcher_errors_do_not_stop_event_processing() {
        use notify::event::{CreateKind, EventKind};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("00000001-0000-0000-0000-000000000000.db");
        fs::write(&path, "x").unwrap();
        let registry = registry(Duration::ZERO);
        let reconciler = Arc::new(Reconciler::new(
            registry.clone(),
            dbfleet_core::identity::default_extensions(),
        ));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(event_task(reconciler, event_rx, shutdown_rx));

        event_tx
            .send(Err(notify::Error::generic("event queue overflowed")))
            .unwrap();
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        event_tx.send(Ok(created)).unwrap();
        drop(event_tx);

        task.await.unwrap().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].file_path, path);
    }

    #[test]
    fn stale_socket_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("daemon.sock");
        fs::write(&socket, "").unwrap();
        prepare_socket_for_bind(&socket).unwrap();
        assert!(!socket.exists());
    }
}
