//! Device authorization grant store (RFC 8628).
//!
//! The polling clock is gated on `last_poll_at`: a poll arriving inside the
//! interval answers `slow_down` and does not advance `last_poll_at`, so the
//! client must back off a full interval from its last accepted poll. The
//! interval itself is static for the life of the grant.

use std::collections::HashMap;
use std::sync::Arc;

use oxidp_core::clock::{Clock, UnixMillis};
use oxidp_core::token::{generate_token, generate_user_code, sha256_hex};

use crate::error::StoreError;
use crate::shard::Sharded;

/// Default device code lifetime: 600 seconds.
pub const DEFAULT_DEVICE_TTL_MS: u64 = 600_000;

/// Default minimum polling interval: 5 seconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Lifecycle of a device authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Waiting for the user to approve or deny.
    Pending,
    /// Approved; tokens not yet collected.
    Approved,
    /// The user denied the request.
    Denied,
    /// Tokens were already collected.
    Consumed,
}

/// A stored device authorization.
#[derive(Debug, Clone)]
pub struct DeviceCodeRecord {
    /// User-facing verification code, `XXXX-XXXX`.
    pub user_code: String,

    /// Client that started the flow.
    pub client_id: String,

    /// Requested scopes (space-separated).
    pub scope: String,

    /// Current status.
    pub status: DeviceStatus,

    /// Creation time, epoch milliseconds.
    pub created_at: UnixMillis,

    /// Expiry, epoch milliseconds.
    pub expires_at: UnixMillis,

    /// Last accepted poll; slow-down violations do not advance this.
    pub last_poll_at: UnixMillis,

    /// Total polls, including violations.
    pub poll_count: u64,

    /// Static minimum polling interval, milliseconds.
    pub interval_ms: u64,

    /// Subject granted at approval.
    pub sub: Option<String>,

    /// User who approved.
    pub user_id: Option<String>,
}

/// Handed to the client when a flow is started.
#[derive(Debug, Clone)]
pub struct DeviceAuthorization {
    /// The device code (plaintext; stored only as a digest).
    pub device_code: String,

    /// The user code to display.
    pub user_code: String,

    /// Expiry, epoch milliseconds.
    pub expires_at: UnixMillis,

    /// Minimum polling interval, seconds.
    pub interval_secs: u64,
}

/// Outcome of one token-endpoint poll.
#[derive(Debug, Clone)]
pub enum DevicePoll {
    /// Not yet decided; keep polling at the interval.
    Pending,
    /// Polled faster than the interval; back off.
    SlowDown,
    /// Approved: the grant, consumed by this poll.
    Approved(DeviceCodeRecord),
    /// The user denied the request.
    Denied,
    /// The grant expired before a decision.
    Expired,
}

/// Sharded device authorization store.
///
/// Records shard by device-code digest; a user-code index routes the
/// verification UI to the owning record.
pub struct DeviceCodeStore {
    shards: Sharded<HashMap<String, DeviceCodeRecord>>,
    user_codes: Sharded<HashMap<String, String>>,
    clock: Arc<dyn Clock>,
}

impl DeviceCodeStore {
    /// Creates the store with `shards` shards (power of two).
    pub fn new(shards: usize, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Self {
            shards: Sharded::new(shards, HashMap::new)?,
            user_codes: Sharded::new(shards, HashMap::new)?,
            clock,
        })
    }

    /// Starts a device authorization flow.
    pub async fn issue(
        &self,
        client_id: &str,
        scope: &str,
        ttl_ms: u64,
        interval_ms: u64,
    ) -> DeviceAuthorization {
        let now = self.clock.now_ms();
        let device_code = generate_token(32);
        let user_code = generate_user_code();
        let digest = sha256_hex(&device_code);
        let expires_at = now.saturating_add(ttl_ms);

        let record = DeviceCodeRecord {
            user_code: user_code.clone(),
            client_id: client_id.to_string(),
            scope: scope.to_string(),
            status: DeviceStatus::Pending,
            created_at: now,
            expires_at,
            last_poll_at: now,
            poll_count: 0,
            interval_ms,
            sub: None,
            user_id: None,
        };

        {
            let mut shard = self.shards.shard(&digest).lock().await;
            shard.insert(digest.clone(), record);
        }
        {
            let mut index = self.user_codes.shard(&user_code).lock().await;
            index.insert(user_code.clone(), digest);
        }

        DeviceAuthorization {
            device_code,
            user_code,
            expires_at,
            interval_secs: interval_ms.div_ceil(1_000),
        }
    }

    /// One token-endpoint poll.
    ///
    /// Expiry wins over every status. An approved grant is consumed by the
    /// poll that collects it; a consumed grant fails with
    /// [`StoreError::AlreadyConsumed`].
    pub async fn poll(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> Result<DevicePoll, StoreError> {
        let now = self.clock.now_ms();
        let digest = sha256_hex(device_code);
        let mut shard = self.shards.shard(&digest).lock().await;

        let record = shard.get_mut(&digest).ok_or(StoreError::NotFound)?;
        if record.client_id != client_id {
            return Err(StoreError::ClientMismatch);
        }

        record.poll_count += 1;

        if now >= record.expires_at {
            return Ok(DevicePoll::Expired);
        }

        match record.status {
            DeviceStatus::Consumed => Err(StoreError::AlreadyConsumed { family_id: None }),
            DeviceStatus::Denied => Ok(DevicePoll::Denied),
            DeviceStatus::Approved => {
                record.status = DeviceStatus::Consumed;
                Ok(DevicePoll::Approved(record.clone()))
            }
            DeviceStatus::Pending => {
                if now.saturating_sub(record.last_poll_at) < record.interval_ms {
                    Ok(DevicePoll::SlowDown)
                } else {
                    record.last_poll_at = now;
                    Ok(DevicePoll::Pending)
                }
            }
        }
    }

    /// Resolves a user code to its pending record, for the verification UI.
    pub async fn find_by_user_code(&self, user_code: &str) -> Result<DeviceCodeRecord, StoreError> {
        let digest = self.digest_for_user_code(user_code).await?;
        let now = self.clock.now_ms();
        let shard = self.shards.shard(&digest).lock().await;
        let record = shard.get(&digest).ok_or(StoreError::NotFound)?;
        if now >= record.expires_at {
            return Err(StoreError::Expired);
        }
        Ok(record.clone())
    }

    /// Approves a pending grant, identified by its user code.
    pub async fn approve_by_user_code(
        &self,
        user_code: &str,
        user_id: &str,
        sub: &str,
    ) -> Result<(), StoreError> {
        let digest = self.digest_for_user_code(user_code).await?;
        self.resolve(&digest, DeviceStatus::Approved, Some(user_id), Some(sub))
            .await
    }

    /// Denies a pending grant, identified by its user code.
    pub async fn deny_by_user_code(&self, user_code: &str) -> Result<(), StoreError> {
        let digest = self.digest_for_user_code(user_code).await?;
        self.resolve(&digest, DeviceStatus::Denied, None, None).await
    }

    /// Approves a pending grant by device code.
    pub async fn approve(
        &self,
        device_code: &str,
        user_id: &str,
        sub: &str,
    ) -> Result<(), StoreError> {
        self.resolve(
            &sha256_hex(device_code),
            DeviceStatus::Approved,
            Some(user_id),
            Some(sub),
        )
        .await
    }

    /// Denies a pending grant by device code.
    pub async fn deny(&self, device_code: &str) -> Result<(), StoreError> {
        self.resolve(&sha256_hex(device_code), DeviceStatus::Denied, None, None)
            .await
    }

    async fn digest_for_user_code(&self, user_code: &str) -> Result<String, StoreError> {
        let index = self.user_codes.shard(user_code).lock().await;
        index.get(user_code).cloned().ok_or(StoreError::NotFound)
    }

    async fn resolve(
        &self,
        digest: &str,
        status: DeviceStatus,
        user_id: Option<&str>,
        sub: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard(digest).lock().await;
        let record = shard.get_mut(digest).ok_or(StoreError::NotFound)?;

        if now >= record.expires_at {
            return Err(StoreError::Expired);
        }
        if record.status != DeviceStatus::Pending {
            return Err(StoreError::AlreadyConsumed { family_id: None });
        }

        record.status = status;
        record.user_id = user_id.map(String::from);
        record.sub = sub.map(String::from);
        Ok(())
    }

    /// Drops expired grants and their user-code index entries.
    pub async fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed_codes: Vec<String> = Vec::new();
        self.shards
            .for_each(|shard| {
                shard.retain(|_, r| {
                    if now < r.expires_at {
                        true
                    } else {
                        removed_codes.push(r.user_code.clone());
                        false
                    }
                });
            })
            .await;

        for user_code in &removed_codes {
            let mut index = self.user_codes.shard(user_code).lock().await;
            index.remove(user_code);
        }
        removed_codes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidp_core::clock::ManualClock;

    #[tokio::test]
    async fn test_flow_timing_end_to_end() {
        let clock = ManualClock::shared(0);
        let store = DeviceCodeStore::new(16, clock.clone()).unwrap();

        let auth = store
            .issue("client-1", "openid", DEFAULT_DEVICE_TTL_MS, 5_000)
            .await;
        assert_eq!(auth.interval_secs, 5);

        // Poll 2 s after issue: inside the interval.
        clock.set(2_000);
        assert!(matches!(
            store.poll(&auth.device_code, "client-1").await.unwrap(),
            DevicePoll::SlowDown
        ));

        // 6 s after issue: the violation did not advance the clock, so this
        // one is accepted.
        clock.set(6_000);
        assert!(matches!(
            store.poll(&auth.device_code, "client-1").await.unwrap(),
            DevicePoll::Pending
        ));

        store
            .approve_by_user_code(&auth.user_code, "user-1", "user-1")
            .await
            .unwrap();

        clock.set(12_000);
        match store.poll(&auth.device_code, "client-1").await.unwrap() {
            DevicePoll::Approved(record) => {
                assert_eq!(record.sub.as_deref(), Some("user-1"));
                assert_eq!(record.scope, "openid");
            }
            other => panic!("expected Approved, got {other:?}"),
        }

        // The grant is consumed.
        clock.set(18_000);
        assert!(matches!(
            store.poll(&auth.device_code, "client-1").await,
            Err(StoreError::AlreadyConsumed { .. })
        ));
    }

    #[tokio::test]
    async fn test_expiry_wins_over_status() {
        let clock = ManualClock::shared(0);
        let store = DeviceCodeStore::new(16, clock.clone()).unwrap();
        let auth = store.issue("client-1", "openid", 600_000, 5_000).await;

        store
            .approve_by_user_code(&auth.user_code, "user-1", "user-1")
            .await
            .unwrap();

        clock.set(600_001);
        assert!(matches!(
            store.poll(&auth.device_code, "client-1").await.unwrap(),
            DevicePoll::Expired
        ));
    }

    #[tokio::test]
    async fn test_denied_flow() {
        let clock = ManualClock::shared(0);
        let store = DeviceCodeStore::new(16, clock.clone()).unwrap();
        let auth = store.issue("client-1", "openid", 600_000, 5_000).await;

        store.deny_by_user_code(&auth.user_code).await.unwrap();

        clock.set(6_000);
        assert!(matches!(
            store.poll(&auth.device_code, "client-1").await.unwrap(),
            DevicePoll::Denied
        ));

        // A decision is final.
        assert!(store
            .approve_by_user_code(&auth.user_code, "u", "u")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_client_binding_on_poll() {
        let clock = ManualClock::shared(0);
        let store = DeviceCodeStore::new(16, clock).unwrap();
        let auth = store.issue("client-1", "openid", 600_000, 5_000).await;

        assert!(matches!(
            store.poll(&auth.device_code, "client-2").await,
            Err(StoreError::ClientMismatch)
        ));
    }

    #[tokio::test]
    async fn test_find_by_user_code() {
        let clock = ManualClock::shared(0);
        let store = DeviceCodeStore::new(16, clock).unwrap();
        let auth = store.issue("client-1", "openid profile", 600_000, 5_000).await;

        let record = store.find_by_user_code(&auth.user_code).await.unwrap();
        assert_eq!(record.client_id, "client-1");
        assert_eq!(record.status, DeviceStatus::Pending);

        assert!(store.find_by_user_code("XXXX-XXXX").await.is_err());
    }

    #[tokio::test]
    async fn test_prune_removes_record_and_index() {
        let clock = ManualClock::shared(0);
        let store = DeviceCodeStore::new(16, clock.clone()).unwrap();
        let auth = store.issue("client-1", "openid", 1_000, 5_000).await;

        clock.advance(2_000);
        assert_eq!(store.prune_expired().await, 1);
        assert!(store.find_by_user_code(&auth.user_code).await.is_err());
    }
}
