//! Settings versioning: snapshot, diff, rollback.
//!
//! Each settings category has a monotone version sequence. A write appends
//! a row carrying the full snapshot plus the change list against its
//! predecessor, and updates the live settings in the same atomic unit.
//! Rollback re-applies a historical snapshot as a brand-new version, so
//! history only ever grows.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use oxidp_core::clock::{Clock, UnixMillis};

use crate::diff::{Change, compute_changes};
use crate::events::{EventSink, SettingsEvent};

/// Errors produced by the settings engine.
#[derive(Debug, thiserror::Error)]
pub enum VersioningError {
    /// The category has no versions yet.
    #[error("no settings for category {category}")]
    CategoryNotFound {
        /// The missing category.
        category: String,
    },

    /// The target version does not exist.
    #[error("version {version} not found in category {category}")]
    VersionNotFound {
        /// The category searched.
        category: String,
        /// The missing version.
        version: u64,
    },

    /// A concurrent writer advanced the category first.
    #[error("version conflict in category {category}: expected {expected}")]
    Conflict {
        /// The category written.
        category: String,
        /// The version the writer expected to follow.
        expected: u64,
    },

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] oxidp_storage::StorageError),
}

/// One row of settings history.
#[derive(Debug, Clone)]
pub struct SettingsVersion {
    /// Settings category.
    pub category: String,

    /// Monotone version number, starting at 1.
    pub version: u64,

    /// Full snapshot at this version.
    pub snapshot: Value,

    /// Changes against the previous version.
    pub changes: Vec<Change>,

    /// Actor that wrote the version.
    pub actor: String,

    /// Actor kind (`admin`, `system`, `rollback`).
    pub actor_type: String,

    /// Stated reason for the change.
    pub change_reason: Option<String>,

    /// Where the change came from (`api`, `rollback`, `migration`).
    pub change_source: String,

    /// Write time, epoch milliseconds.
    pub created_at: UnixMillis,
}

/// Storage seam for settings history.
///
/// `append` must be atomic with the live-settings update and must reject a
/// version that does not directly follow the current one, which is what
/// makes the engine's optimistic concurrency work.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Appends a version and updates the live settings atomically.
    ///
    /// # Errors
    ///
    /// Returns [`VersioningError::Conflict`] unless
    /// `row.version == current + 1`.
    async fn append(&self, row: SettingsVersion) -> Result<(), VersioningError>;

    /// The latest version of a category.
    async fn latest(&self, category: &str) -> Result<Option<SettingsVersion>, VersioningError>;

    /// A specific version of a category.
    async fn get(
        &self,
        category: &str,
        version: u64,
    ) -> Result<Option<SettingsVersion>, VersioningError>;

    /// History of a category, newest first.
    async fn history(
        &self,
        category: &str,
        limit: usize,
    ) -> Result<Vec<SettingsVersion>, VersioningError>;
}

/// The settings engine.
pub struct SettingsEngine {
    store: Arc<dyn VersionStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl SettingsEngine {
    /// Creates the engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn VersionStore>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            events,
            clock,
        }
    }

    /// The live snapshot of a category.
    pub async fn current(&self, category: &str) -> Result<Value, VersioningError> {
        self.store
            .latest(category)
            .await?
            .map(|row| row.snapshot)
            .ok_or_else(|| VersioningError::CategoryNotFound {
                category: category.to_string(),
            })
    }

    /// Writes a new version of a category.
    pub async fn write_version(
        &self,
        category: &str,
        snapshot: Value,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<SettingsVersion, VersioningError> {
        self.write_internal(category, snapshot, actor, "admin", reason, "api")
            .await
    }

    /// Rolls a category back to `target_version`.
    ///
    /// The rollback writes a new version whose snapshot equals the
    /// target's; history is append-only. Events bracket the attempt.
    pub async fn rollback(
        &self,
        category: &str,
        target_version: u64,
        actor: &str,
    ) -> Result<SettingsVersion, VersioningError> {
        self.events.emit(SettingsEvent::RollbackStarted {
            category: category.to_string(),
            target_version,
        });

        let result = self.rollback_internal(category, target_version, actor).await;
        match &result {
            Ok(row) => self.events.emit(SettingsEvent::RollbackCompleted {
                category: category.to_string(),
                target_version,
                new_version: row.version,
            }),
            Err(e) => self.events.emit(SettingsEvent::RollbackFailed {
                category: category.to_string(),
                target_version,
                reason: e.to_string(),
            }),
        }
        result
    }

    /// Structural diff between two stored versions.
    pub async fn compare(
        &self,
        category: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Change>, VersioningError> {
        let from_row = self.require(category, from).await?;
        let to_row = self.require(category, to).await?;
        Ok(compute_changes(&from_row.snapshot, &to_row.snapshot))
    }

    /// History of a category, newest first.
    pub async fn history(
        &self,
        category: &str,
        limit: usize,
    ) -> Result<Vec<SettingsVersion>, VersioningError> {
        self.store.history(category, limit).await
    }

    async fn rollback_internal(
        &self,
        category: &str,
        target_version: u64,
        actor: &str,
    ) -> Result<SettingsVersion, VersioningError> {
        let target = self.require(category, target_version).await?;
        self.write_internal(
            category,
            target.snapshot,
            actor,
            "rollback",
            Some(&format!("rollback to version {target_version}")),
            "rollback",
        )
        .await
    }

    async fn write_internal(
        &self,
        category: &str,
        snapshot: Value,
        actor: &str,
        actor_type: &str,
        reason: Option<&str>,
        source: &str,
    ) -> Result<SettingsVersion, VersioningError> {
        let previous = self.store.latest(category).await?;
        let (prev_version, prev_snapshot) = previous
            .map(|row| (row.version, row.snapshot))
            .unwrap_or((0, Value::Null));

        let changes = compute_changes(&prev_snapshot, &snapshot);
        let row = SettingsVersion {
            category: category.to_string(),
            version: prev_version + 1,
            snapshot,
            changes,
            actor: actor.to_string(),
            actor_type: actor_type.to_string(),
            change_reason: reason.map(String::from),
            change_source: source.to_string(),
            created_at: self.clock.now_ms(),
        };

        self.store.append(row.clone()).await?;
        self.events.emit(SettingsEvent::VersionWritten {
            category: category.to_string(),
            version: row.version,
            actor: actor.to_string(),
        });
        Ok(row)
    }

    async fn require(
        &self,
        category: &str,
        version: u64,
    ) -> Result<SettingsVersion, VersioningError> {
        self.store
            .get(category, version)
            .await?
            .ok_or_else(|| VersioningError::VersionNotFound {
                category: category.to_string(),
                version,
            })
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// In-memory version store.
#[derive(Default)]
pub struct MemoryVersionStore {
    rows: RwLock<HashMap<String, Vec<SettingsVersion>>>,
}

impl MemoryVersionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn append(&self, row: SettingsVersion) -> Result<(), VersioningError> {
        let mut rows = self.rows.write().await;
        let history = rows.entry(row.category.clone()).or_default();
        let current = history.last().map_or(0, |r| r.version);
        if row.version != current + 1 {
            return Err(VersioningError::Conflict {
                category: row.category,
                expected: row.version,
            });
        }
        history.push(row);
        Ok(())
    }

    async fn latest(&self, category: &str) -> Result<Option<SettingsVersion>, VersioningError> {
        let rows = self.rows.read().await;
        Ok(rows.get(category).and_then(|h| h.last().cloned()))
    }

    async fn get(
        &self,
        category: &str,
        version: u64,
    ) -> Result<Option<SettingsVersion>, VersioningError> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(category)
            .and_then(|h| h.iter().find(|r| r.version == version).cloned()))
    }

    async fn history(
        &self,
        category: &str,
        limit: usize,
    ) -> Result<Vec<SettingsVersion>, VersioningError> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(category)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
