//! The storage adapter trait.
//!
//! Adapters expose a uniform relational surface: parameterized queries with
//! positional binding, atomic batches, and serialized transactions. All SQL
//! lives in the repository modules that call the adapter; the adapter never
//! interpolates parameters into statement text.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::StorageError;

/// A positional statement parameter.
///
/// The variants cover the column types the schema uses. `Json` carries
/// already-validated structures (addresses, custom attributes, settings
/// snapshots).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Boolean column.
    Bool(bool),
    /// 64-bit integer column; also used for millisecond timestamps.
    Int(i64),
    /// Double-precision column.
    Float(f64),
    /// Text column.
    Text(String),
    /// JSON / JSONB column.
    Json(Value),
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        Self::Int(v as i64)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Value> for SqlValue {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A single parameterized statement.
#[derive(Debug, Clone)]
pub struct Statement {
    /// Statement text with positional placeholders (`$1`, `$2`, ...).
    pub sql: String,

    /// Positional parameters, bound in order.
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// Creates a statement with its positional parameters.
    #[must_use]
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A decoded result row: column name to value.
pub type Row = HashMap<String, Value>;

/// Result of a mutating statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteResult {
    /// Number of rows the statement affected.
    pub rows_affected: u64,

    /// Last inserted row id, when the backend reports one.
    pub last_insert_id: Option<i64>,
}

/// Adapter health probe result.
#[derive(Debug, Clone, Copy)]
pub struct Health {
    /// Whether the backend answered the probe.
    pub healthy: bool,

    /// Round-trip latency of the probe in milliseconds.
    pub latency_ms: u64,
}

/// Statements executed inside a transaction.
///
/// A transaction serializes its statements into a single logical unit and
/// aborts on the first failure; the adapter rolls back everything executed
/// so far.
#[async_trait]
pub trait TransactionHandle: Send {
    /// Runs a query inside the transaction.
    async fn query(&mut self, statement: Statement) -> Result<Vec<Row>, StorageError>;

    /// Runs a mutating statement inside the transaction.
    async fn execute(&mut self, statement: Statement) -> Result<ExecuteResult, StorageError>;
}

/// Uniform relational storage surface.
///
/// Two logical adapters always exist: the CORE adapter and the PII adapter
/// selected per user by the partition router. Implementations must be
/// thread-safe (`Send + Sync`) and must enforce the caller-supplied deadline
/// on every call, yielding [`StorageError::Timeout`] on expiry.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Runs a query and returns all rows.
    async fn query(&self, statement: Statement) -> Result<Vec<Row>, StorageError>;

    /// Runs a query expected to return at most one row.
    async fn query_one(&self, statement: Statement) -> Result<Option<Row>, StorageError> {
        let mut rows = self.query(statement).await?;
        if rows.len() > 1 {
            return Err(StorageError::decode(format!(
                "expected at most one row, got {}",
                rows.len()
            )));
        }
        Ok(rows.pop())
    }

    /// Runs a mutating statement.
    async fn execute(&self, statement: Statement) -> Result<ExecuteResult, StorageError>;

    /// Runs a list of statements atomically: either every statement applies
    /// or none does.
    async fn batch(&self, statements: Vec<Statement>) -> Result<Vec<ExecuteResult>, StorageError>;

    /// Runs caller-produced statements inside a transaction.
    ///
    /// The implementation begins a transaction, hands the caller a
    /// [`TransactionHandle`], and commits when the callback returns `Ok`.
    /// Any error rolls back.
    async fn transaction(
        &self,
        f: Box<
            dyn for<'t> FnOnce(
                    &'t mut dyn TransactionHandle,
                ) -> BoxFuture<'t, Result<(), StorageError>>
                + Send,
        >,
    ) -> Result<(), StorageError>;

    /// Probes backend connectivity.
    async fn health(&self) -> Health;

    /// The per-call deadline applied by this adapter.
    fn deadline(&self) -> Duration {
        Duration::from_secs(2)
    }
}
