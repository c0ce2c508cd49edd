//! # oxidp-storage
//!
//! Storage abstraction layer for the oxidp authorization server.
//!
//! This crate defines the traits and types that relational backends must
//! implement. It contains no implementation - those live in separate crates
//! (`oxidp-storage-postgres`).
//!
//! ## Overview
//!
//! The main trait is [`StorageAdapter`]: a uniform query/execute/batch/
//! transaction API with positional, injection-safe parameter binding. The
//! process always holds at least two logical adapters:
//!
//! - the CORE adapter, for protocol and account state, and
//! - one adapter per registered PII partition, selected by the partition
//!   router.
//!
//! [`AdapterRegistry`] owns that mapping.

mod adapter;
mod error;
mod registry;

pub use adapter::{
    ExecuteResult, Health, Row, SqlValue, Statement, StorageAdapter, TransactionHandle,
};
pub use error::StorageError;
pub use registry::AdapterRegistry;

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a boxed adapter trait object.
pub type DynAdapter = std::sync::Arc<dyn StorageAdapter>;
