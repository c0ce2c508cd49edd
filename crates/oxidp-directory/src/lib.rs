//! # oxidp-directory
//!
//! User directory and PII partition routing.
//!
//! Identity data is split in two: a CORE row (`users_core`) that the
//! protocol layer reads on every request, and a PII row that lives in
//! whichever storage partition the router selects. The router resolves a
//! partition through a trust hierarchy - tenant policy over declared
//! residence over custom rules over geo - and the PII write protocol keeps
//! `pii_status` honest: a PII row exists iff the status is `active`.

mod cache;
mod error;
mod partition;
mod sql;
mod user;

pub use cache::SettingsCache;
pub use error::DirectoryError;
pub use partition::{
    PartitionDecision, PartitionRouter, PartitionRule, PartitionSettings, ResolutionMethod,
    RuleOperator, SettingsSource, country_partition,
};
pub use sql::SqlUserStore;
pub use user::{
    MemoryUserStore, PiiStatus, UserCore, UserDirectory, UserPii, UserProfile, UserStore,
};

/// Type alias for directory results.
pub type DirectoryResult<T> = Result<T, DirectoryError>;
