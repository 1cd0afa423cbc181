//! dbfleet daemon runtime: watch directories, reconcile the client registry
//! and serve status over the Unix socket.

mod error;
pub mod paths;
pub mod protocol;
pub mod reconciler;
mod runtime;

pub use error::{DaemonError, ReconcileError};
pub use protocol::{
    request_client, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use reconciler::{
    probe_directory, translate, Action, FsEvent, FsEventKind, Reconciler, ScanSummary, WatchState,
    WatchedDir,
};
pub use runtime::{
    build_status_payload, drain_sessions, format_uptime, init_tracing, run, start_blocking,
    DrainSummary, StatusContext,
};
