//! Relational version store over the storage adapter.
//!
//! History lives in `settings_history`; the live snapshot per category in
//! `settings_live`. An append writes both in one atomic batch, and the
//! history insert guards on the expected predecessor version so a
//! concurrent writer surfaces as a conflict instead of a fork.

use async_trait::async_trait;
use serde_json::Value;

use oxidp_storage::{DynAdapter, Row, Statement, StorageError};

use crate::diff::Change;
use crate::versioning::{SettingsVersion, VersionStore, VersioningError};

const INSERT_HISTORY: &str = "INSERT INTO settings_history \
     (category, version, snapshot, changes, actor, actor_type, change_reason, \
      change_source, created_at) \
     SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9 \
     WHERE (SELECT COALESCE(MAX(version), 0) FROM settings_history WHERE category = $1) = $2 - 1";

const UPSERT_LIVE: &str = "INSERT INTO settings_live (category, version, snapshot, updated_at) \
     VALUES ($1, $2, $3, $4) \
     ON CONFLICT (category) DO UPDATE SET \
      version = $2, snapshot = $3, updated_at = $4";

const SELECT_LATEST: &str = "SELECT category, version, snapshot, changes, actor, actor_type, \
      change_reason, change_source, created_at \
     FROM settings_history WHERE category = $1 \
     ORDER BY version DESC LIMIT 1";

const SELECT_VERSION: &str = "SELECT category, version, snapshot, changes, actor, actor_type, \
      change_reason, change_source, created_at \
     FROM settings_history WHERE category = $1 AND version = $2";

const SELECT_HISTORY: &str = "SELECT category, version, snapshot, changes, actor, actor_type, \
      change_reason, change_source, created_at \
     FROM settings_history WHERE category = $1 \
     ORDER BY version DESC LIMIT $2";

/// SQL-backed [`VersionStore`].
pub struct SqlVersionStore {
    adapter: DynAdapter,
}

impl SqlVersionStore {
    /// Creates the store over the CORE adapter.
    #[must_use]
    pub fn new(adapter: DynAdapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl VersionStore for SqlVersionStore {
    async fn append(&self, row: SettingsVersion) -> Result<(), VersioningError> {
        let changes = serde_json::to_value(&row.changes)
            .map_err(|e| VersioningError::Storage(StorageError::decode(e.to_string())))?;

        let history = Statement::new(
            INSERT_HISTORY,
            vec![
                row.category.as_str().into(),
                (row.version as i64).into(),
                row.snapshot.clone().into(),
                changes.into(),
                row.actor.as_str().into(),
                row.actor_type.as_str().into(),
                row.change_reason.as_deref().into(),
                row.change_source.as_str().into(),
                row.created_at.into(),
            ],
        );
        let live = Statement::new(
            UPSERT_LIVE,
            vec![
                row.category.as_str().into(),
                (row.version as i64).into(),
                row.snapshot.clone().into(),
                row.created_at.into(),
            ],
        );

        let results = self.adapter.batch(vec![history, live]).await?;
        // The guarded insert affected zero rows iff another writer advanced
        // the category first.
        if results.first().is_none_or(|r| r.rows_affected == 0) {
            return Err(VersioningError::Conflict {
                category: row.category,
                expected: row.version,
            });
        }
        Ok(())
    }

    async fn latest(&self, category: &str) -> Result<Option<SettingsVersion>, VersioningError> {
        let statement = Statement::new(SELECT_LATEST, vec![category.into()]);
        let row = self.adapter.query_one(statement).await?;
        row.map(decode_version).transpose().map_err(Into::into)
    }

    async fn get(
        &self,
        category: &str,
        version: u64,
    ) -> Result<Option<SettingsVersion>, VersioningError> {
        let statement = Statement::new(
            SELECT_VERSION,
            vec![category.into(), (version as i64).into()],
        );
        let row = self.adapter.query_one(statement).await?;
        row.map(decode_version).transpose().map_err(Into::into)
    }

    async fn history(
        &self,
        category: &str,
        limit: usize,
    ) -> Result<Vec<SettingsVersion>, VersioningError> {
        let statement = Statement::new(
            SELECT_HISTORY,
            vec![category.into(), (limit as i64).into()],
        );
        let rows = self.adapter.query(statement).await?;
        rows.into_iter()
            .map(|row| decode_version(row).map_err(Into::into))
            .collect()
    }
}

fn decode_version(row: Row) -> Result<SettingsVersion, StorageError> {
    let changes: Vec<Change> = row
        .get("changes")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StorageError::decode(format!("changes column: {e}")))?
        .unwrap_or_default();

    Ok(SettingsVersion {
        category: take_str(&row, "category")?,
        version: take_i64(&row, "version")?.max(0) as u64,
        snapshot: row.get("snapshot").cloned().unwrap_or(Value::Null),
        changes,
        actor: take_str(&row, "actor")?,
        actor_type: take_str(&row, "actor_type")?,
        change_reason: row
            .get("change_reason")
            .and_then(Value::as_str)
            .map(String::from),
        change_source: take_str(&row, "change_source")?,
        created_at: take_i64(&row, "created_at")?.max(0) as u64,
    })
}

fn take_str(row: &Row, column: &str) -> Result<String, StorageError> {
    row.get(column)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| StorageError::decode(format!("missing column {column}")))
}

fn take_i64(row: &Row, column: &str) -> Result<i64, StorageError> {
    row.get(column)
        .and_then(Value::as_i64)
        .ok_or_else(|| StorageError::decode(format!("missing column {column}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_version_row() {
        let row: Row = [
            ("category", json!("partition")),
            ("version", json!(3)),
            ("snapshot", json!({"default": "eu"})),
            (
                "changes",
                json!([{"path": "default", "op": "changed", "from": "us", "to": "eu"}]),
            ),
            ("actor", json!("admin-1")),
            ("actor_type", json!("admin")),
            ("change_reason", json!(null)),
            ("change_source", json!("api")),
            ("created_at", json!(1_700_000_000_000i64)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let version = decode_version(row).unwrap();
        assert_eq!(version.version, 3);
        assert_eq!(version.changes.len(), 1);
        assert_eq!(version.snapshot, json!({"default": "eu"}));
        assert!(version.change_reason.is_none());
    }
}
