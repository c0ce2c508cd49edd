//! CIBA backchannel authentication request store.
//!
//! Mirrors the device-code store but is keyed by `auth_req_id` and carries a
//! binding message for the authentication device. The same polling rules
//! apply: a static interval, `slow_down` on violation without advancing the
//! poll clock, expiry trumping status.

use std::collections::HashMap;
use std::sync::Arc;

use oxidp_core::clock::{Clock, UnixMillis};
use oxidp_core::token::generate_token;

use crate::device::DeviceStatus;
use crate::error::StoreError;
use crate::shard::Sharded;

/// A stored backchannel authentication request.
#[derive(Debug, Clone)]
pub struct CibaRequest {
    /// Backchannel request identifier.
    pub auth_req_id: String,

    /// Client that initiated the request.
    pub client_id: String,

    /// Requested scopes (space-separated).
    pub scope: String,

    /// Hint identifying the user to authenticate.
    pub login_hint: Option<String>,

    /// Message shown on the authentication device.
    pub binding_message: Option<String>,

    /// Current status; shares the device-grant lifecycle.
    pub status: DeviceStatus,

    /// Creation time, epoch milliseconds.
    pub created_at: UnixMillis,

    /// Expiry, epoch milliseconds.
    pub expires_at: UnixMillis,

    /// Last accepted poll.
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

/// Outcome of one CIBA token-endpoint poll.
#[derive(Debug, Clone)]
pub enum CibaPoll {
    /// Not yet decided.
    Pending,
    /// Polling faster than the interval.
    SlowDown,
    /// Approved: the request, consumed by this poll.
    Approved(CibaRequest),
    /// The user denied the request.
    Denied,
    /// The request expired before a decision.
    Expired,
}

/// Sharded CIBA request store.
pub struct CibaRequestStore {
    shards: Sharded<HashMap<String, CibaRequest>>,
    clock: Arc<dyn Clock>,
}

impl CibaRequestStore {
    /// Creates the store with `shards` shards (power of two).
    pub fn new(shards: usize, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Self {
            shards: Sharded::new(shards, HashMap::new)?,
            clock,
        })
    }

    /// Starts a backchannel authentication request.
    pub async fn issue(
        &self,
        client_id: &str,
        scope: &str,
        login_hint: Option<&str>,
        binding_message: Option<&str>,
        ttl_ms: u64,
        interval_ms: u64,
    ) -> CibaRequest {
        let now = self.clock.now_ms();
        let auth_req_id = generate_token(32);

        let record = CibaRequest {
            auth_req_id: auth_req_id.clone(),
            client_id: client_id.to_string(),
            scope: scope.to_string(),
            login_hint: login_hint.map(String::from),
            binding_message: binding_message.map(String::from),
            status: DeviceStatus::Pending,
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
            last_poll_at: now,
            poll_count: 0,
            interval_ms,
            sub: None,
            user_id: None,
        };

        let mut shard = self.shards.shard(&auth_req_id).lock().await;
        shard.insert(auth_req_id.clone(), record.clone());
        record
    }

    /// One token-endpoint poll for `auth_req_id`.
    pub async fn poll(&self, auth_req_id: &str, client_id: &str) -> Result<CibaPoll, StoreError> {
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard(auth_req_id).lock().await;

        let record = shard.get_mut(auth_req_id).ok_or(StoreError::NotFound)?;
        if record.client_id != client_id {
            return Err(StoreError::ClientMismatch);
        }

        record.poll_count += 1;

        if now >= record.expires_at {
            return Ok(CibaPoll::Expired);
        }

        match record.status {
            DeviceStatus::Consumed => Err(StoreError::AlreadyConsumed { family_id: None }),
            DeviceStatus::Denied => Ok(CibaPoll::Denied),
            DeviceStatus::Approved => {
                record.status = DeviceStatus::Consumed;
                Ok(CibaPoll::Approved(record.clone()))
            }
            DeviceStatus::Pending => {
                if now.saturating_sub(record.last_poll_at) < record.interval_ms {
                    Ok(CibaPoll::SlowDown)
                } else {
                    record.last_poll_at = now;
                    Ok(CibaPoll::Pending)
                }
            }
        }
    }

    /// Resolves a pending request: approved with a subject, or denied.
    pub async fn resolve(
        &self,
        auth_req_id: &str,
        approved: bool,
        user_id: Option<&str>,
        sub: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard(auth_req_id).lock().await;
        let record = shard.get_mut(auth_req_id).ok_or(StoreError::NotFound)?;

        if now >= record.expires_at {
            return Err(StoreError::Expired);
        }
        if record.status != DeviceStatus::Pending {
            return Err(StoreError::AlreadyConsumed { family_id: None });
        }

        record.status = if approved {
            DeviceStatus::Approved
        } else {
            DeviceStatus::Denied
        };
        record.user_id = user_id.map(String::from);
        record.sub = sub.map(String::from);
        Ok(())
    }

    /// Drops expired requests. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.shards
            .for_each(|shard| {
                let before = shard.len();
                shard.retain(|_, r| now < r.expires_at);
                removed += before - shard.len();
            })
            .await;
        removed
    }
}
