//! # oxidp-storage-postgres
//!
//! PostgreSQL implementation of the oxidp [`StorageAdapter`] contract,
//! using sqlx for parameter binding and pooling.
//!
//! One `PostgresAdapter` wraps one connection pool. The server constructs
//! one adapter for the CORE database and one per configured PII partition,
//! then hands them to `oxidp_storage::AdapterRegistry`.
//!
//! [`StorageAdapter`]: oxidp_storage::StorageAdapter

mod adapter;
mod config;
mod pool;

pub use adapter::PostgresAdapter;
pub use config::PostgresConfig;
pub use pool::create_pool;
