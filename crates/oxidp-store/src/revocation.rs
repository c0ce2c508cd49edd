//! Token revocation store.
//!
//! Holds revoked access-token JTIs (until their natural expiry) and revoked
//! refresh families. Revocation is idempotent; `is_revoked` answers for
//! either keyspace.

use std::collections::HashMap;
use std::sync::Arc;

use oxidp_core::clock::{Clock, UnixMillis};

use crate::error::StoreError;
use crate::shard::Sharded;

/// Lifetime of a refresh-family tombstone.
///
/// Family entries have no natural expiry of their own; they are kept for the
/// maximum refresh lifetime so every outstanding handle sees them.
const FAMILY_TOMBSTONE_TTL_MS: u64 = 30 * 24 * 60 * 60 * 1_000;

/// Sharded revocation store.
pub struct RevocationStore {
    shards: Sharded<HashMap<String, UnixMillis>>,
    clock: Arc<dyn Clock>,
}

impl RevocationStore {
    /// Creates the store with `shards` shards (power of two).
    pub fn new(shards: usize, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Self {
            shards: Sharded::new(shards, HashMap::new)?,
            clock,
        })
    }

    /// Revokes an access token by jti, remembered until `expires_at`.
    ///
    /// Idempotent. A later call with a longer expiry extends the entry.
    pub async fn revoke_access_jti(&self, jti: &str, expires_at: UnixMillis) {
        let key = Self::jti_key(jti);
        let mut shard = self.shards.shard(&key).lock().await;
        let entry = shard.entry(key).or_insert(expires_at);
        *entry = (*entry).max(expires_at);
    }

    /// Revokes an entire refresh family. Idempotent.
    pub async fn revoke_refresh_family(&self, family_id: &str) {
        let key = Self::family_key(family_id);
        let expires_at = self.clock.now_ms().saturating_add(FAMILY_TOMBSTONE_TTL_MS);
        let mut shard = self.shards.shard(&key).lock().await;
        shard.entry(key).or_insert(expires_at);
    }

    /// Returns `true` if the access token jti is revoked.
    pub async fn is_jti_revoked(&self, jti: &str) -> bool {
        self.is_live(&Self::jti_key(jti)).await
    }

    /// Returns `true` if the refresh family is revoked.
    pub async fn is_family_revoked(&self, family_id: &str) -> bool {
        self.is_live(&Self::family_key(family_id)).await
    }

    async fn is_live(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let shard = self.shards.shard(key).lock().await;
        shard.get(key).is_some_and(|&expires_at| now < expires_at)
    }

    /// Drops entries past their retention. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.shards
            .for_each(|shard| {
                let before = shard.len();
                shard.retain(|_, &mut expires_at| now < expires_at);
                removed += before - shard.len();
            })
            .await;
        removed
    }

    fn jti_key(jti: &str) -> String {
        format!("jti:{jti}")
    }

    fn family_key(family_id: &str) -> String {
        format!("family:{family_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidp_core::clock::ManualClock;

    #[tokio::test]
    async fn test_revocation_is_idempotent() {
        let clock = ManualClock::shared(0);
        let store = RevocationStore::new(16, clock).unwrap();

        store.revoke_access_jti("jti-1", 60_000).await;
        store.revoke_access_jti("jti-1", 60_000).await;
        assert!(store.is_jti_revoked("jti-1").await);

        store.revoke_refresh_family("fam-1").await;
        store.revoke_refresh_family("fam-1").await;
        assert!(store.is_family_revoked("fam-1").await);
    }

    #[tokio::test]
    async fn test_jti_entry_expires_with_token() {
        let clock = ManualClock::shared(0);
        let store = RevocationStore::new(16, clock.clone()).unwrap();

        store.revoke_access_jti("jti", 60_000).await;
        assert!(store.is_jti_revoked("jti").await);

        clock.advance(60_001);
        assert!(!store.is_jti_revoked("jti").await);
        assert_eq!(store.prune_expired().await, 1);
    }

    #[tokio::test]
    async fn test_keyspaces_do_not_collide() {
        let clock = ManualClock::shared(0);
        let store = RevocationStore::new(16, clock).unwrap();

        store.revoke_refresh_family("x").await;
        assert!(!store.is_jti_revoked("x").await);
        assert!(store.is_family_revoked("x").await);
    }
}
