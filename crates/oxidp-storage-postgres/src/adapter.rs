//! PostgreSQL implementation of the storage adapter contract.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use sqlx_core::column::Column;
use sqlx_core::query::Query;
use sqlx_core::row::Row as SqlxRow;
use sqlx_postgres::{PgArguments, PgPool, PgRow, Postgres};
use tracing::warn;

use oxidp_storage::{
    ExecuteResult, Health, Row, SqlValue, Statement, StorageAdapter, StorageError,
    TransactionHandle,
};

use crate::config::PostgresConfig;
use crate::pool::create_pool;

/// SQLSTATE codes treated as write conflicts.
const CONFLICT_STATES: &[&str] = &["23505", "40001", "40P01"];

/// PostgreSQL adapter over one connection pool.
pub struct PostgresAdapter {
    pool: PgPool,
    deadline: Duration,
}

impl PostgresAdapter {
    /// Connects a new adapter.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] when the pool cannot connect.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StorageError> {
        let pool = create_pool(config).await?;
        Ok(Self {
            pool,
            deadline: Duration::from_millis(config.statement_deadline_ms),
        })
    }

    /// Wraps an existing pool, for tests and shared-pool setups.
    #[must_use]
    pub fn from_pool(pool: PgPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }

    async fn with_deadline<T>(
        &self,
        fut: impl Future<Output = Result<T, sqlx_core::Error>>,
    ) -> Result<T, StorageError> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result.map_err(map_sqlx_error),
            Err(_) => Err(StorageError::timeout(self.deadline.as_millis() as u64)),
        }
    }
}

/// Binds positional parameters onto a query in order.
fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Json(v) => query.bind(v),
        };
    }
    query
}

/// Decodes a database row into the adapter's column-name map.
fn decode_row(row: &PgRow) -> Result<Row, StorageError> {
    let mut out = Row::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().to_string();
        let value: Value = match type_name.as_str() {
            "BOOL" => row
                .try_get::<Option<bool>, _>(idx)
                .map(|v| v.map_or(Value::Null, Value::from)),
            "INT2" | "INT4" | "INT8" => row
                .try_get::<Option<i64>, _>(idx)
                .map(|v| v.map_or(Value::Null, Value::from)),
            "FLOAT4" | "FLOAT8" | "NUMERIC" => row
                .try_get::<Option<f64>, _>(idx)
                .map(|v| v.map_or(Value::Null, Value::from)),
            "JSON" | "JSONB" => row
                .try_get::<Option<Value>, _>(idx)
                .map(|v| v.unwrap_or(Value::Null)),
            _ => row
                .try_get::<Option<String>, _>(idx)
                .map(|v| v.map_or(Value::Null, Value::from)),
        }
        .map_err(|e| StorageError::decode(format!("column {}: {e}", column.name())))?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn map_sqlx_error(err: sqlx_core::Error) -> StorageError {
    match &err {
        sqlx_core::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            if CONFLICT_STATES.contains(&code.as_str()) {
                StorageError::conflict(db.message().to_string())
            } else {
                StorageError::internal(db.message().to_string())
            }
        }
        sqlx_core::Error::PoolTimedOut | sqlx_core::Error::PoolClosed | sqlx_core::Error::Io(_) => {
            StorageError::unavailable(err.to_string())
        }
        sqlx_core::Error::RowNotFound => StorageError::decode("row not found"),
        _ => StorageError::internal(err.to_string()),
    }
}

#[async_trait]
impl StorageAdapter for PostgresAdapter {
    async fn query(&self, statement: Statement) -> Result<Vec<Row>, StorageError> {
        let rows = self
            .with_deadline(async {
                bind_params(sqlx_core::query::query(&statement.sql), &statement.params)
                    .fetch_all(&self.pool)
                    .await
            })
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, statement: Statement) -> Result<ExecuteResult, StorageError> {
        let result = self
            .with_deadline(async {
                bind_params(sqlx_core::query::query(&statement.sql), &statement.params)
                    .execute(&self.pool)
                    .await
            })
            .await?;
        Ok(ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }

    async fn batch(&self, statements: Vec<Statement>) -> Result<Vec<ExecuteResult>, StorageError> {
        // All-or-nothing: every statement runs inside one transaction.
        let run = async {
            let mut tx = self.pool.begin().await?;
            let mut results = Vec::with_capacity(statements.len());
            for statement in &statements {
                let result = bind_params(sqlx_core::query::query(&statement.sql), &statement.params)
                    .execute(&mut *tx)
                    .await?;
                results.push(ExecuteResult {
                    rows_affected: result.rows_affected(),
                    last_insert_id: None,
                });
            }
            tx.commit().await?;
            Ok(results)
        };
        self.with_deadline(run).await
    }

    async fn transaction(
        &self,
        f: Box<
            dyn for<'t> FnOnce(
                    &'t mut dyn TransactionHandle,
                ) -> BoxFuture<'t, Result<(), StorageError>>
                + Send,
        >,
    ) -> Result<(), StorageError> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut handle = PgTransactionHandle { tx: Some(tx) };

        match f(&mut handle).await {
            Ok(()) => match handle.tx.take() {
                Some(tx) => tx.commit().await.map_err(map_sqlx_error),
                None => Err(StorageError::internal("transaction already completed")),
            },
            Err(e) => {
                if let Some(tx) = handle.tx.take()
                    && let Err(rollback_err) = tx.rollback().await
                {
                    warn!(error = %rollback_err, "transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn health(&self) -> Health {
        let start = Instant::now();
        let healthy = sqlx_core::query::query("SELECT 1")
            .execute(&self.pool)
            .await
            .is_ok();
        Health {
            healthy,
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn deadline(&self) -> Duration {
        self.deadline
    }
}

/// Live transaction passed to [`StorageAdapter::transaction`] callbacks.
struct PgTransactionHandle {
    // Wrapped in Option so commit/rollback can take ownership.
    tx: Option<sqlx_core::transaction::Transaction<'static, Postgres>>,
}

impl PgTransactionHandle {
    fn tx(
        &mut self,
    ) -> Result<&mut sqlx_core::transaction::Transaction<'static, Postgres>, StorageError> {
        self.tx
            .as_mut()
            .ok_or_else(|| StorageError::internal("transaction already completed"))
    }
}

#[async_trait]
impl TransactionHandle for PgTransactionHandle {
    async fn query(&mut self, statement: Statement) -> Result<Vec<Row>, StorageError> {
        let tx = self.tx()?;
        let rows = bind_params(sqlx_core::query::query(&statement.sql), &statement.params)
            .fetch_all(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, statement: Statement) -> Result<ExecuteResult, StorageError> {
        let tx = self.tx()?;
        let result = bind_params(sqlx_core::query::query(&statement.sql), &statement.params)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }
}
