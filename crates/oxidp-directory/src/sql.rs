//! Relational user store over the storage adapter.
//!
//! CORE rows live in `users_core` on the CORE adapter; PII rows live in
//! `users_pii` on whichever partition adapter the router selected. All
//! statements bind positionally through the adapter - no interpolation.

use async_trait::async_trait;
use serde_json::Value;

use oxidp_storage::{AdapterRegistry, Row, SqlValue, Statement, StorageError};

use crate::DirectoryResult;
use crate::error::DirectoryError;
use crate::user::{PiiStatus, UserCore, UserPii, UserStore};

use oxidp_core::clock::UnixMillis;

const INSERT_CORE: &str = "INSERT INTO users_core \
     (tenant_id, user_id, is_active, user_type, pii_partition, pii_status, \
      created_at, updated_at, email_verified, last_login_at, scheduled_deletion_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const SELECT_CORE: &str = "SELECT tenant_id, user_id, is_active, user_type, pii_partition, \
      pii_status, created_at, updated_at, email_verified, last_login_at, \
      scheduled_deletion_at \
     FROM users_core WHERE tenant_id = $1 AND user_id = $2";

const UPDATE_PII_STATE: &str = "UPDATE users_core SET pii_partition = $3, pii_status = $4, updated_at = $5 \
     WHERE tenant_id = $1 AND user_id = $2";

const UPSERT_PII: &str = "INSERT INTO users_pii \
     (user_id, tenant_id, email, name, preferred_username, phone, address, custom_attrs) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
     ON CONFLICT (tenant_id, user_id) DO UPDATE SET \
      email = $3, name = $4, preferred_username = $5, phone = $6, \
      address = $7, custom_attrs = $8";

const SELECT_PII: &str = "SELECT user_id, tenant_id, email, name, preferred_username, phone, \
      address, custom_attrs \
     FROM users_pii WHERE tenant_id = $1 AND user_id = $2";

const DELETE_PII: &str = "DELETE FROM users_pii WHERE tenant_id = $1 AND user_id = $2";

/// SQL-backed [`UserStore`].
pub struct SqlUserStore {
    adapters: AdapterRegistry,
}

impl SqlUserStore {
    /// Creates the store over the adapter registry.
    #[must_use]
    pub fn new(adapters: AdapterRegistry) -> Self {
        Self { adapters }
    }
}

#[async_trait]
impl UserStore for SqlUserStore {
    async fn insert_core(&self, core: &UserCore) -> DirectoryResult<()> {
        let statement = Statement::new(
            INSERT_CORE,
            vec![
                core.tenant_id.as_str().into(),
                core.user_id.as_str().into(),
                core.is_active.into(),
                core.user_type.as_str().into(),
                core.pii_partition.as_deref().into(),
                status_str(core.pii_status).into(),
                core.created_at.into(),
                core.updated_at.into(),
                core.email_verified.into(),
                core.last_login_at.into(),
                core.scheduled_deletion_at.into(),
            ],
        );
        match self.adapters.core().execute(statement).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => Err(DirectoryError::UserExists {
                user_id: core.user_id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_core(&self, tenant_id: &str, user_id: &str) -> DirectoryResult<Option<UserCore>> {
        let statement = Statement::new(SELECT_CORE, vec![tenant_id.into(), user_id.into()]);
        let row = self.adapters.core().query_one(statement).await?;
        row.map(decode_core).transpose().map_err(Into::into)
    }

    async fn update_pii_state(
        &self,
        tenant_id: &str,
        user_id: &str,
        partition: Option<&str>,
        status: PiiStatus,
        now: UnixMillis,
    ) -> DirectoryResult<()> {
        let statement = Statement::new(
            UPDATE_PII_STATE,
            vec![
                tenant_id.into(),
                user_id.into(),
                partition.into(),
                status_str(status).into(),
                now.into(),
            ],
        );
        let result = self.adapters.core().execute(statement).await?;
        if result.rows_affected == 0 {
            return Err(DirectoryError::UserNotFound {
                user_id: user_id.to_string(),
            });
        }
        Ok(())
    }

    async fn write_pii(&self, partition: &str, pii: &UserPii) -> DirectoryResult<()> {
        let adapter = self
            .adapters
            .partition(partition)
            .map_err(|_| DirectoryError::UnknownPartition {
                partition: partition.to_string(),
            })?;
        let statement = Statement::new(
            UPSERT_PII,
            vec![
                pii.user_id.as_str().into(),
                pii.tenant_id.as_str().into(),
                pii.email.as_deref().into(),
                pii.name.as_deref().into(),
                pii.preferred_username.as_deref().into(),
                pii.phone.as_deref().into(),
                pii.address.clone().into(),
                pii.custom_attrs.clone().into(),
            ],
        );
        adapter.execute(statement).await?;
        Ok(())
    }

    async fn read_pii(
        &self,
        partition: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> DirectoryResult<Option<UserPii>> {
        let adapter = self
            .adapters
            .partition(partition)
            .map_err(|_| DirectoryError::UnknownPartition {
                partition: partition.to_string(),
            })?;
        let statement = Statement::new(SELECT_PII, vec![tenant_id.into(), user_id.into()]);
        let row = adapter.query_one(statement).await?;
        row.map(decode_pii).transpose().map_err(Into::into)
    }

    async fn delete_pii(
        &self,
        partition: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> DirectoryResult<()> {
        let adapter = self
            .adapters
            .partition(partition)
            .map_err(|_| DirectoryError::UnknownPartition {
                partition: partition.to_string(),
            })?;
        let statement = Statement::new(DELETE_PII, vec![tenant_id.into(), user_id.into()]);
        adapter.execute(statement).await?;
        Ok(())
    }
}

fn status_str(status: PiiStatus) -> &'static str {
    match status {
        PiiStatus::None => "none",
        PiiStatus::Pending => "pending",
        PiiStatus::Active => "active",
        PiiStatus::Failed => "failed",
        PiiStatus::Deleted => "deleted",
    }
}

fn parse_status(raw: &str) -> Result<PiiStatus, StorageError> {
    match raw {
        "none" => Ok(PiiStatus::None),
        "pending" => Ok(PiiStatus::Pending),
        "active" => Ok(PiiStatus::Active),
        "failed" => Ok(PiiStatus::Failed),
        "deleted" => Ok(PiiStatus::Deleted),
        other => Err(StorageError::decode(format!("unknown pii_status {other}"))),
    }
}

fn decode_core(row: Row) -> Result<UserCore, StorageError> {
    Ok(UserCore {
        tenant_id: take_str(&row, "tenant_id")?,
        user_id: take_str(&row, "user_id")?,
        is_active: take_bool(&row, "is_active")?,
        user_type: take_str(&row, "user_type")?,
        pii_partition: take_opt_str(&row, "pii_partition"),
        pii_status: parse_status(&take_str(&row, "pii_status")?)?,
        created_at: take_u64(&row, "created_at")?,
        updated_at: take_u64(&row, "updated_at")?,
        email_verified: take_bool(&row, "email_verified")?,
        last_login_at: take_opt_u64(&row, "last_login_at"),
        scheduled_deletion_at: take_opt_u64(&row, "scheduled_deletion_at"),
    })
}

fn decode_pii(row: Row) -> Result<UserPii, StorageError> {
    Ok(UserPii {
        user_id: take_str(&row, "user_id")?,
        tenant_id: take_str(&row, "tenant_id")?,
        email: take_opt_str(&row, "email"),
        name: take_opt_str(&row, "name"),
        preferred_username: take_opt_str(&row, "preferred_username"),
        phone: take_opt_str(&row, "phone"),
        address: row.get("address").cloned().unwrap_or(Value::Null),
        custom_attrs: row.get("custom_attrs").cloned().unwrap_or(Value::Null),
    })
}

fn take_str(row: &Row, column: &str) -> Result<String, StorageError> {
    row.get(column)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| StorageError::decode(format!("missing column {column}")))
}

fn take_opt_str(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(String::from)
}

fn take_bool(row: &Row, column: &str) -> Result<bool, StorageError> {
    row.get(column)
        .and_then(Value::as_bool)
        .ok_or_else(|| StorageError::decode(format!("missing column {column}")))
}

fn take_u64(row: &Row, column: &str) -> Result<u64, StorageError> {
    row.get(column)
        .and_then(Value::as_i64)
        .map(|v| v.max(0) as u64)
        .ok_or_else(|| StorageError::decode(format!("missing column {column}")))
}

fn take_opt_u64(row: &Row, column: &str) -> Option<u64> {
    row.get(column).and_then(Value::as_i64).map(|v| v.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_core_row() {
        let row: Row = [
            ("tenant_id", json!("acme")),
            ("user_id", json!("user-1")),
            ("is_active", json!(true)),
            ("user_type", json!("user")),
            ("pii_partition", json!("eu")),
            ("pii_status", json!("active")),
            ("created_at", json!(1_700_000_000_000i64)),
            ("updated_at", json!(1_700_000_000_000i64)),
            ("email_verified", json!(false)),
            ("last_login_at", json!(null)),
            ("scheduled_deletion_at", json!(null)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let core = decode_core(row).unwrap();
        assert_eq!(core.pii_partition.as_deref(), Some("eu"));
        assert_eq!(core.pii_status, PiiStatus::Active);
        assert!(core.last_login_at.is_none());
    }

    #[test]
    fn test_decode_rejects_unknown_status() {
        assert!(parse_status("weird").is_err());
    }
}
