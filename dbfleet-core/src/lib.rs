//! dbfleet core library: client identity, replication sessions, the client
//! registry and the configuration file model.
//!
//! Public API surface:
//! - [`types`]: [`ClientId`], [`RemoteLocator`], records and views
//! - [`identity`]: filename → client classification
//! - [`session`]: replication engine boundary and [`SessionAdapter`]
//! - [`registry`]: [`ClientRegistry`], the single source of truth
//! - [`config`]: `~/.dbfleet/config.yaml`
//! - [`error`]: error taxonomy

pub mod config;
pub mod error;
pub mod identity;
pub mod registry;
pub mod session;
pub mod types;

pub use config::FleetConfig;
pub use error::{ConfigError, InvalidClientId, RegisterError, SessionError};
pub use identity::{extract_identity, is_database_file};
pub use registry::{ClientRegistry, RegisterOutcome, UnregisterOutcome};
pub use session::{EngineError, ReplicaHandle, ReplicationEngine, Session, SessionAdapter};
pub use types::{ClientId, ClientRecord, ClientView, RemoteLocator};
