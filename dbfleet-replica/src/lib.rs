//! # dbfleet-replica
//!
//! Filesystem-backed replication engine. The replica root plays the role of
//! the object-storage bucket; every client gets `<root>/<remote-locator>/`
//! holding a JSON manifest and hash-gated snapshots of its database file.
//!
//! [`FsReplicaEngine`] implements the core's engine boundary. [`restore`]
//! reads the same layout back for listing and restore.

pub mod engine;
pub mod error;
pub mod manifest;
pub mod restore;
pub mod snapshot;

pub use engine::{FsReplicaEngine, FsReplicaHandle};
pub use error::ReplicaError;
pub use manifest::{Manifest, SnapshotEntry};
pub use restore::{list_snapshots, restore_latest, RestoreOutcome};
pub use snapshot::{take_snapshot, SnapshotResult};
