//! Connection pool management.

use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, info};

use oxidp_storage::StorageError;

use crate::config::PostgresConfig;

/// Type alias for PostgreSQL pool options.
pub type PgPoolOptions = PoolOptions<Postgres>;

/// Creates a connection pool from the given configuration.
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool, StorageError> {
    info!(
        pool_size = config.pool_size,
        connect_timeout_ms = config.connect_timeout_ms,
        "Creating PostgreSQL connection pool"
    );

    let min_connections = config
        .min_connections
        .unwrap_or(config.pool_size / 4)
        .max(1);

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
        .test_before_acquire(false)
        .connect(&config.url)
        .await
        .map_err(|e| StorageError::unavailable(e.to_string()))?;

    debug!("PostgreSQL connection pool created");

    Ok(pool)
}
