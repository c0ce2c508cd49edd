//! # oxidp-config
//!
//! Configuration for the oxidp authorization server, in two halves:
//!
//! - [`app`] - process configuration loaded at startup from files and the
//!   environment (issuer, shard counts, secrets, CORS, cookies)
//! - [`versioning`] - the runtime settings engine: snapshots, monotone
//!   versions, structural diffs, and rollback with at-most-one semantics

pub mod app;
mod diff;
mod events;
mod sql;
pub mod versioning;

pub use app::{AppConfig, ConfigError, CookieSameSite, ShardConfig};
pub use diff::{Change, ChangeOp, compute_changes};
pub use events::{EventSink, SettingsEvent, TracingEventSink};
pub use sql::SqlVersionStore;
pub use versioning::{
    MemoryVersionStore, SettingsEngine, SettingsVersion, VersionStore, VersioningError,
};
