//! The user directory: CORE rows, PII rows, and the write protocol that
//! keeps them honest.
//!
//! A PII row exists iff `users_core.pii_status = active`. The CORE insert
//! (`pending`) and the PII insert land in different partitions, so they can
//! never share a transaction; the status update closes the window. On PII
//! failure the user stays `pending`/`failed` and is surfaced for retry -
//! the CORE row is never rolled back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use oxidp_core::clock::{Clock, UnixMillis};

use crate::DirectoryResult;
use crate::cache::SettingsCache;
use crate::error::DirectoryError;
use crate::partition::{PartitionDecision, PartitionRouter};

/// Lifecycle of a user's PII row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiStatus {
    /// No PII was ever submitted.
    None,
    /// CORE row exists; the PII write has not completed.
    Pending,
    /// The PII row is in its partition.
    Active,
    /// The PII write failed; retry pending.
    Failed,
    /// PII erased; the CORE tombstone remains.
    Deleted,
}

/// The CORE half of a user, readable on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCore {
    /// Owning tenant.
    pub tenant_id: String,

    /// User identifier.
    pub user_id: String,

    /// Whether the account is active.
    pub is_active: bool,

    /// Account kind (`user`, `service`, ...).
    pub user_type: String,

    /// Partition holding the PII row, once routed.
    pub pii_partition: Option<String>,

    /// PII lifecycle status.
    pub pii_status: PiiStatus,

    /// Creation time, epoch milliseconds.
    pub created_at: UnixMillis,

    /// Last update, epoch milliseconds.
    pub updated_at: UnixMillis,

    /// Whether the primary email is verified.
    pub email_verified: bool,

    /// Last login, epoch milliseconds.
    pub last_login_at: Option<UnixMillis>,

    /// Scheduled account deletion, epoch milliseconds.
    pub scheduled_deletion_at: Option<UnixMillis>,
}

/// The PII half of a user, stored in its routed partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPii {
    /// User identifier.
    pub user_id: String,

    /// Owning tenant.
    pub tenant_id: String,

    /// Primary email.
    pub email: Option<String>,

    /// Display name.
    pub name: Option<String>,

    /// Preferred username.
    pub preferred_username: Option<String>,

    /// Phone number.
    pub phone: Option<String>,

    /// Postal address document.
    pub address: Value,

    /// Tenant-defined attributes.
    pub custom_attrs: Value,
}

/// A user with whatever PII is readable.
#[derive(Debug, Clone)]
pub struct UserProfile {
    /// The CORE row.
    pub core: UserCore,

    /// The PII row, when `pii_status` is active and the partition answered.
    pub pii: Option<UserPii>,
}

/// Storage seam for CORE and partition-addressed PII rows.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a CORE row.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::UserExists`] on id collision.
    async fn insert_core(&self, core: &UserCore) -> DirectoryResult<()>;

    /// Reads a CORE row.
    async fn get_core(&self, tenant_id: &str, user_id: &str) -> DirectoryResult<Option<UserCore>>;

    /// Updates `pii_partition` / `pii_status` on a CORE row.
    async fn update_pii_state(
        &self,
        tenant_id: &str,
        user_id: &str,
        partition: Option<&str>,
        status: PiiStatus,
        now: UnixMillis,
    ) -> DirectoryResult<()>;

    /// Writes a PII row into `partition`.
    async fn write_pii(&self, partition: &str, pii: &UserPii) -> DirectoryResult<()>;

    /// Reads a PII row from `partition`.
    async fn read_pii(
        &self,
        partition: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> DirectoryResult<Option<UserPii>>;

    /// Deletes a PII row from `partition`.
    async fn delete_pii(
        &self,
        partition: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> DirectoryResult<()>;
}

/// The directory service: routing plus the two-phase PII write.
pub struct UserDirectory {
    store: Arc<dyn UserStore>,
    settings: Arc<SettingsCache>,
    clock: Arc<dyn Clock>,
}

impl UserDirectory {
    /// Creates the directory.
    #[must_use]
    pub fn new(
        store: Arc<dyn UserStore>,
        settings: Arc<SettingsCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            settings,
            clock,
        }
    }

    /// Creates a user: routes the partition, inserts the CORE row as
    /// `pending`, writes the PII row, then activates.
    ///
    /// # Errors
    ///
    /// On PII failure the CORE row stays with status `failed` and
    /// [`DirectoryError::PiiWriteFailed`] is returned; the caller retries
    /// with [`UserDirectory::retry_pii`].
    pub async fn create_user(
        &self,
        tenant_id: &str,
        user_id: &str,
        pii: UserPii,
        attrs: &Value,
        country: Option<&str>,
    ) -> DirectoryResult<UserCore> {
        let settings = self.settings.get("partition").await?;
        let decision = PartitionRouter::resolve_new_user(&settings, tenant_id, attrs, country);
        info!(
            user_id,
            partition = %decision.partition,
            method = ?decision.method,
            "routed new user"
        );

        let now = self.clock.now_ms();
        let core = UserCore {
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            is_active: true,
            user_type: "user".to_string(),
            pii_partition: Some(decision.partition.clone()),
            pii_status: PiiStatus::Pending,
            created_at: now,
            updated_at: now,
            email_verified: false,
            last_login_at: None,
            scheduled_deletion_at: None,
        };
        self.store.insert_core(&core).await?;

        self.write_and_activate(&core, &decision, pii).await
    }

    /// Retries the PII write for a `pending` or `failed` user.
    pub async fn retry_pii(
        &self,
        tenant_id: &str,
        user_id: &str,
        pii: UserPii,
    ) -> DirectoryResult<UserCore> {
        let core = self
            .store
            .get_core(tenant_id, user_id)
            .await?
            .ok_or_else(|| DirectoryError::UserNotFound {
                user_id: user_id.to_string(),
            })?;

        if !matches!(core.pii_status, PiiStatus::Pending | PiiStatus::Failed) {
            return Ok(core);
        }

        let settings = self.settings.get("partition").await?;
        let decision =
            PartitionRouter::resolve_existing(&settings, core.pii_partition.as_deref());
        self.write_and_activate(&core, &decision, pii).await
    }

    /// Reads a user's profile, pulling PII from its partition when active.
    pub async fn get_profile(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> DirectoryResult<UserProfile> {
        let core = self
            .store
            .get_core(tenant_id, user_id)
            .await?
            .ok_or_else(|| DirectoryError::UserNotFound {
                user_id: user_id.to_string(),
            })?;

        let pii = match core.pii_status {
            PiiStatus::Active => {
                let settings = self.settings.get("partition").await?;
                let decision =
                    PartitionRouter::resolve_existing(&settings, core.pii_partition.as_deref());
                self.store
                    .read_pii(&decision.partition, tenant_id, user_id)
                    .await?
            }
            _ => None,
        };

        Ok(UserProfile { core, pii })
    }

    /// GDPR erasure: removes the PII row and tombstones the CORE row.
    pub async fn erase_pii(&self, tenant_id: &str, user_id: &str) -> DirectoryResult<()> {
        let core = self
            .store
            .get_core(tenant_id, user_id)
            .await?
            .ok_or_else(|| DirectoryError::UserNotFound {
                user_id: user_id.to_string(),
            })?;

        if let Some(partition) = core.pii_partition.as_deref() {
            self.store.delete_pii(partition, tenant_id, user_id).await?;
        }
        self.store
            .update_pii_state(
                tenant_id,
                user_id,
                core.pii_partition.as_deref(),
                PiiStatus::Deleted,
                self.clock.now_ms(),
            )
            .await?;
        info!(user_id, "PII erased; tombstone retained");
        Ok(())
    }

    async fn write_and_activate(
        &self,
        core: &UserCore,
        decision: &PartitionDecision,
        pii: UserPii,
    ) -> DirectoryResult<UserCore> {
        match self.store.write_pii(&decision.partition, &pii).await {
            Ok(()) => {
                let now = self.clock.now_ms();
                self.store
                    .update_pii_state(
                        &core.tenant_id,
                        &core.user_id,
                        Some(&decision.partition),
                        PiiStatus::Active,
                        now,
                    )
                    .await?;
                let mut activated = core.clone();
                activated.pii_partition = Some(decision.partition.clone());
                activated.pii_status = PiiStatus::Active;
                activated.updated_at = now;
                Ok(activated)
            }
            Err(e) => {
                warn!(user_id = %core.user_id, error = %e, "PII write failed");
                self.store
                    .update_pii_state(
                        &core.tenant_id,
                        &core.user_id,
                        Some(&decision.partition),
                        PiiStatus::Failed,
                        self.clock.now_ms(),
                    )
                    .await?;
                Err(DirectoryError::PiiWriteFailed {
                    user_id: core.user_id.clone(),
                    message: e.to_string(),
                })
            }
        }
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// In-memory user store, with per-partition failure injection for tests.
pub struct MemoryUserStore {
    core: RwLock<HashMap<(String, String), UserCore>>,
    pii: RwLock<HashMap<(String, String, String), UserPii>>,
    failing_partitions: RwLock<Vec<String>>,
}

impl MemoryUserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: RwLock::new(HashMap::new()),
            pii: RwLock::new(HashMap::new()),
            failing_partitions: RwLock::new(Vec::new()),
        }
    }

    /// Makes every PII write to `partition` fail, for failure-path tests.
    pub async fn fail_partition(&self, partition: &str) {
        self.failing_partitions
            .write()
            .await
            .push(partition.to_string());
    }

    /// Clears failure injection.
    pub async fn heal_partitions(&self) {
        self.failing_partitions.write().await.clear();
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert_core(&self, core: &UserCore) -> DirectoryResult<()> {
        let mut map = self.core.write().await;
        let key = (core.tenant_id.clone(), core.user_id.clone());
        if map.contains_key(&key) {
            return Err(DirectoryError::UserExists {
                user_id: core.user_id.clone(),
            });
        }
        map.insert(key, core.clone());
        Ok(())
    }

    async fn get_core(&self, tenant_id: &str, user_id: &str) -> DirectoryResult<Option<UserCore>> {
        let map = self.core.read().await;
        Ok(map
            .get(&(tenant_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn update_pii_state(
        &self,
        tenant_id: &str,
        user_id: &str,
        partition: Option<&str>,
        status: PiiStatus,
        now: UnixMillis,
    ) -> DirectoryResult<()> {
        let mut map = self.core.write().await;
        let core = map
            .get_mut(&(tenant_id.to_string(), user_id.to_string()))
            .ok_or_else(|| DirectoryError::UserNotFound {
                user_id: user_id.to_string(),
            })?;
        core.pii_partition = partition.map(String::from);
        core.pii_status = status;
        core.updated_at = now;
        Ok(())
    }

    async fn write_pii(&self, partition: &str, pii: &UserPii) -> DirectoryResult<()> {
        if self
            .failing_partitions
            .read()
            .await
            .iter()
            .any(|p| p == partition)
        {
            return Err(DirectoryError::Storage(
                oxidp_storage::StorageError::unavailable(format!("partition {partition} down")),
            ));
        }
        let mut map = self.pii.write().await;
        map.insert(
            (
                partition.to_string(),
                pii.tenant_id.clone(),
                pii.user_id.clone(),
            ),
            pii.clone(),
        );
        Ok(())
    }

    async fn read_pii(
        &self,
        partition: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> DirectoryResult<Option<UserPii>> {
        let map = self.pii.read().await;
        Ok(map
            .get(&(
                partition.to_string(),
                tenant_id.to_string(),
                user_id.to_string(),
            ))
            .cloned())
    }

    async fn delete_pii(
        &self,
        partition: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> DirectoryResult<()> {
        let mut map = self.pii.write().await;
        map.remove(&(
            partition.to_string(),
            tenant_id.to_string(),
            user_id.to_string(),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{PartitionSettings, SettingsSource};
    use oxidp_core::clock::ManualClock;
    use serde_json::json;

    struct StaticSource;

    #[async_trait]
    impl SettingsSource for StaticSource {
        async fn load(&self) -> DirectoryResult<PartitionSettings> {
            Ok(PartitionSettings {
                default_partition: "default".into(),
                ip_routing_enabled: true,
                available_partitions: vec!["default".into(), "eu".into(), "apac".into()],
                tenant_partitions: Default::default(),
                partition_rules: vec![],
                updated_at: 0,
                updated_by: None,
            })
        }
    }

    fn directory() -> (UserDirectory, Arc<MemoryUserStore>) {
        let clock = ManualClock::shared(1_000);
        let store = Arc::new(MemoryUserStore::new());
        let cache = Arc::new(SettingsCache::new(
            Arc::new(StaticSource),
            clock.clone(),
            10_000,
        ));
        (
            UserDirectory::new(store.clone(), cache, clock),
            store,
        )
    }

    fn pii(user_id: &str) -> UserPii {
        UserPii {
            user_id: user_id.into(),
            tenant_id: "acme".into(),
            email: Some("u@example.com".into()),
            name: Some("U. Ser".into()),
            preferred_username: Some("user".into()),
            phone: None,
            address: json!({}),
            custom_attrs: json!({}),
        }
    }

    #[tokio::test]
    async fn test_create_user_activates_pii() {
        let (directory, store) = directory();

        let core = directory
            .create_user(
                "acme",
                "user-1",
                pii("user-1"),
                &json!({"declared_residence": "eu"}),
                None,
            )
            .await
            .unwrap();

        assert_eq!(core.pii_status, PiiStatus::Active);
        assert_eq!(core.pii_partition.as_deref(), Some("eu"));

        // Invariant: active status implies a PII row in the partition.
        let row = store.read_pii("eu", "acme", "user-1").await.unwrap();
        assert!(row.is_some());

        let profile = directory.get_profile("acme", "user-1").await.unwrap();
        assert_eq!(profile.pii.unwrap().email.as_deref(), Some("u@example.com"));
    }

    #[tokio::test]
    async fn test_pii_failure_keeps_core_for_retry() {
        let (directory, store) = directory();
        store.fail_partition("eu").await;

        let result = directory
            .create_user(
                "acme",
                "user-1",
                pii("user-1"),
                &json!({"declared_residence": "eu"}),
                None,
            )
            .await;
        assert!(matches!(result, Err(DirectoryError::PiiWriteFailed { .. })));

        // The CORE row survives in `failed`; no PII row exists.
        let core = store.get_core("acme", "user-1").await.unwrap().unwrap();
        assert_eq!(core.pii_status, PiiStatus::Failed);
        assert!(store.read_pii("eu", "acme", "user-1").await.unwrap().is_none());

        // Retry succeeds after the partition heals.
        store.heal_partitions().await;
        let core = directory
            .retry_pii("acme", "user-1", pii("user-1"))
            .await
            .unwrap();
        assert_eq!(core.pii_status, PiiStatus::Active);
    }

    #[tokio::test]
    async fn test_retry_is_noop_for_active_users() {
        let (directory, _store) = directory();
        directory
            .create_user("acme", "user-1", pii("user-1"), &json!({}), None)
            .await
            .unwrap();

        let core = directory
            .retry_pii("acme", "user-1", pii("user-1"))
            .await
            .unwrap();
        assert_eq!(core.pii_status, PiiStatus::Active);
    }

    #[tokio::test]
    async fn test_duplicate_user_rejected() {
        let (directory, _store) = directory();
        directory
            .create_user("acme", "user-1", pii("user-1"), &json!({}), None)
            .await
            .unwrap();
        let result = directory
            .create_user("acme", "user-1", pii("user-1"), &json!({}), None)
            .await;
        assert!(matches!(result, Err(DirectoryError::UserExists { .. })));
    }

    #[tokio::test]
    async fn test_erasure_leaves_tombstone() {
        let (directory, store) = directory();
        directory
            .create_user(
                "acme",
                "user-1",
                pii("user-1"),
                &json!({"declared_residence": "eu"}),
                None,
            )
            .await
            .unwrap();

        directory.erase_pii("acme", "user-1").await.unwrap();

        let core = store.get_core("acme", "user-1").await.unwrap().unwrap();
        assert_eq!(core.pii_status, PiiStatus::Deleted);
        assert!(store.read_pii("eu", "acme", "user-1").await.unwrap().is_none());

        // The profile is PII-free but the account is still addressable.
        let profile = directory.get_profile("acme", "user-1").await.unwrap();
        assert!(profile.pii.is_none());
    }

    #[tokio::test]
    async fn test_geo_routing_on_create() {
        let (directory, _store) = directory();
        let core = directory
            .create_user("acme", "user-jp", pii("user-jp"), &json!({}), Some("JP"))
            .await
            .unwrap();
        assert_eq!(core.pii_partition.as_deref(), Some("apac"));
    }
}
