//! Session store.
//!
//! Sessions carry both an absolute lifetime and an idle lifetime. `touch`
//! slides the idle expiry forward but never past the absolute cap, and a
//! revoked session is indistinguishable from a missing one to readers.

use std::collections::HashMap;
use std::sync::Arc;

use oxidp_core::clock::{Clock, UnixMillis};

use crate::error::StoreError;
use crate::shard::Sharded;

/// Attributes fixed at session creation.
#[derive(Debug, Clone, Default)]
pub struct SessionAttrs {
    /// Authentication method references accumulated at login.
    pub amr: Vec<String>,

    /// Authentication context class reference.
    pub acr: Option<String>,
}

/// A stored session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Session identifier (opaque, server-minted).
    pub session_id: String,

    /// The authenticated user.
    pub user_id: String,

    /// Owning tenant.
    pub tenant_id: String,

    /// Creation time, epoch milliseconds.
    pub created_at: UnixMillis,

    /// Current expiry: `min(absolute, idle)` at the last touch.
    pub expires_at: UnixMillis,

    /// Hard cap the session can never outlive.
    pub absolute_expires_at: UnixMillis,

    /// Idle window applied on each touch.
    pub idle_ttl_ms: u64,

    /// Authentication method references.
    pub amr: Vec<String>,

    /// Authentication context class reference.
    pub acr: Option<String>,

    /// Whether the session was revoked.
    pub revoked: bool,
}

impl SessionRecord {
    fn is_active(&self, now: UnixMillis) -> bool {
        !self.revoked && now < self.expires_at
    }
}

/// Sharded session store.
pub struct SessionStore {
    shards: Sharded<HashMap<String, SessionRecord>>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    /// Creates the store with `shards` shards (power of two).
    pub fn new(shards: usize, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Self {
            shards: Sharded::new(shards, HashMap::new)?,
            clock,
        })
    }

    /// Creates a session.
    ///
    /// `absolute_ttl_ms` caps the session lifetime; `idle_ttl_ms` is the
    /// sliding window extended by [`SessionStore::touch`].
    pub async fn create(
        &self,
        session_id: &str,
        user_id: &str,
        tenant_id: &str,
        absolute_ttl_ms: u64,
        idle_ttl_ms: u64,
        attrs: SessionAttrs,
    ) -> SessionRecord {
        let now = self.clock.now_ms();
        let absolute_expires_at = now.saturating_add(absolute_ttl_ms);
        let record = SessionRecord {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            created_at: now,
            expires_at: absolute_expires_at.min(now.saturating_add(idle_ttl_ms)),
            absolute_expires_at,
            idle_ttl_ms,
            amr: attrs.amr,
            acr: attrs.acr,
            revoked: false,
        };

        let mut shard = self.shards.shard(session_id).lock().await;
        shard.insert(session_id.to_string(), record.clone());
        record
    }

    /// Returns the session if it is active (unexpired, unrevoked).
    pub async fn get(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        let now = self.clock.now_ms();
        let shard = self.shards.shard(session_id).lock().await;
        match shard.get(session_id) {
            Some(record) if record.is_active(now) => Ok(record.clone()),
            Some(record) if record.revoked => Err(StoreError::Revoked),
            Some(_) => Err(StoreError::Expired),
            None => Err(StoreError::NotFound),
        }
    }

    /// Slides the idle expiry forward, capped at the absolute lifetime.
    pub async fn touch(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard(session_id).lock().await;
        let record = shard.get_mut(session_id).ok_or(StoreError::NotFound)?;

        if record.revoked {
            return Err(StoreError::Revoked);
        }
        if now >= record.expires_at {
            return Err(StoreError::Expired);
        }

        record.expires_at = record
            .absolute_expires_at
            .min(now.saturating_add(record.idle_ttl_ms));
        Ok(record.clone())
    }

    /// Revokes a session. Idempotent; unknown sessions are not an error.
    pub async fn revoke(&self, session_id: &str) {
        let mut shard = self.shards.shard(session_id).lock().await;
        if let Some(record) = shard.get_mut(session_id) {
            record.revoked = true;
        }
    }

    /// Drops expired and revoked sessions. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.shards
            .for_each(|shard| {
                let before = shard.len();
                shard.retain(|_, r| r.is_active(now));
                removed += before - shard.len();
            })
            .await;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidp_core::clock::ManualClock;

    fn store(clock: Arc<ManualClock>) -> SessionStore {
        SessionStore::new(8, clock).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let clock = ManualClock::shared(1_000);
        let store = store(clock.clone());

        let record = store
            .create(
                "sess-1",
                "user-1",
                "acme",
                3_600_000,
                600_000,
                SessionAttrs {
                    amr: vec!["pwd".into()],
                    acr: Some("urn:mace:incommon:iap:silver".into()),
                },
            )
            .await;
        assert!(record.expires_at >= record.created_at);

        let fetched = store.get("sess-1").await.unwrap();
        assert_eq!(fetched.user_id, "user-1");
        assert_eq!(fetched.amr, vec!["pwd".to_string()]);
    }

    #[tokio::test]
    async fn test_idle_expiry_and_touch() {
        let clock = ManualClock::shared(0);
        let store = store(clock.clone());

        store
            .create("s", "u", "t", 3_600_000, 600_000, SessionAttrs::default())
            .await;

        // Idle expiry passes without a touch.
        clock.advance(600_001);
        assert!(matches!(store.get("s").await, Err(StoreError::Expired)));

        // With touches, the session stays alive past the original idle window.
        store
            .create("s2", "u", "t", 3_600_000, 600_000, SessionAttrs::default())
            .await;
        clock.advance(500_000);
        store.touch("s2").await.unwrap();
        clock.advance(500_000);
        assert!(store.get("s2").await.is_ok());
    }

    #[tokio::test]
    async fn test_touch_never_exceeds_absolute_lifetime() {
        let clock = ManualClock::shared(0);
        let store = store(clock.clone());

        store
            .create("s", "u", "t", 1_000_000, 600_000, SessionAttrs::default())
            .await;

        clock.advance(900_000);
        let touched = store.touch("s").await.unwrap();
        assert_eq!(touched.expires_at, 1_000_000);

        clock.advance(100_001);
        assert!(matches!(store.get("s").await, Err(StoreError::Expired)));
    }

    #[tokio::test]
    async fn test_revoked_session_not_observable_as_active() {
        let clock = ManualClock::shared(0);
        let store = store(clock.clone());

        store
            .create("s", "u", "t", 3_600_000, 600_000, SessionAttrs::default())
            .await;
        store.revoke("s").await;

        assert!(matches!(store.get("s").await, Err(StoreError::Revoked)));
        assert!(matches!(store.touch("s").await, Err(StoreError::Revoked)));

        // Revoking again is a no-op.
        store.revoke("s").await;
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let clock = ManualClock::shared(0);
        let store = store(clock.clone());

        store
            .create("a", "u", "t", 1_000, 1_000, SessionAttrs::default())
            .await;
        store
            .create("b", "u", "t", 3_600_000, 3_600_000, SessionAttrs::default())
            .await;
        store.revoke("b").await;
        store
            .create("c", "u", "t", 3_600_000, 3_600_000, SessionAttrs::default())
            .await;

        clock.advance(2_000);
        assert_eq!(store.prune_expired().await, 2);
        assert!(store.get("c").await.is_ok());
    }
}
