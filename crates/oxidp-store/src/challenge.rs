//! Challenge store for OTP, WebAuthn, magic-link, and device verification.
//!
//! Challenges are keyed `{kind}:{session_key}` and are strictly single-use.
//! `consume_atomic` is one compare-and-set: the first caller wins, everyone
//! else sees `AlreadyConsumed`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use oxidp_core::clock::{Clock, UnixMillis};

use crate::error::StoreError;
use crate::shard::Sharded;

/// A stored authentication challenge.
#[derive(Debug, Clone)]
pub struct ChallengeRecord {
    /// Challenge key, `{kind}:{session_key}`.
    pub id: String,

    /// User the challenge was issued for, when known.
    pub user_id: Option<String>,

    /// Digest of the challenge secret (OTP code, magic-link token).
    pub challenge_hash: String,

    /// Challenge kind: `otp`, `webauthn`, `magic_link`, `device`.
    pub challenge_type: String,

    /// Expiry, epoch milliseconds.
    pub expires_at: UnixMillis,

    /// Whether the challenge has been consumed.
    pub consumed: bool,

    /// Email the challenge was delivered to, for OTP and magic links.
    pub email: Option<String>,

    /// Kind-specific payload (WebAuthn options, device hints).
    pub metadata: Value,
}

/// Sharded challenge store.
pub struct ChallengeStore {
    shards: Sharded<HashMap<String, ChallengeRecord>>,
    clock: Arc<dyn Clock>,
}

impl ChallengeStore {
    /// Creates the store with `shards` shards (power of two).
    pub fn new(shards: usize, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Self {
            shards: Sharded::new(shards, HashMap::new)?,
            clock,
        })
    }

    /// Stores a challenge, replacing any live challenge under the same key.
    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        &self,
        id: &str,
        challenge_type: &str,
        user_id: Option<&str>,
        challenge_hash: &str,
        ttl_ms: u64,
        email: Option<&str>,
        metadata: Value,
    ) {
        let now = self.clock.now_ms();
        let record = ChallengeRecord {
            id: id.to_string(),
            user_id: user_id.map(String::from),
            challenge_hash: challenge_hash.to_string(),
            challenge_type: challenge_type.to_string(),
            expires_at: now.saturating_add(ttl_ms),
            consumed: false,
            email: email.map(String::from),
            metadata,
        };

        let mut shard = self.shards.shard(id).lock().await;
        shard.insert(id.to_string(), record);
    }

    /// Atomically consumes a challenge of the expected type.
    ///
    /// The first caller gets the record; later callers get
    /// [`StoreError::AlreadyConsumed`]. A type mismatch reads as not-found so
    /// probing cannot distinguish kinds.
    pub async fn consume_atomic(
        &self,
        id: &str,
        challenge_type: &str,
    ) -> Result<ChallengeRecord, StoreError> {
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard(id).lock().await;

        let record = shard.get_mut(id).ok_or(StoreError::NotFound)?;
        if record.challenge_type != challenge_type {
            return Err(StoreError::NotFound);
        }
        if record.consumed {
            return Err(StoreError::AlreadyConsumed { family_id: None });
        }
        if now >= record.expires_at {
            return Err(StoreError::Expired);
        }

        record.consumed = true;
        Ok(record.clone())
    }

    /// Drops expired and consumed challenges. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.shards
            .for_each(|shard| {
                let before = shard.len();
                shard.retain(|_, r| !r.consumed && now < r.expires_at);
                removed += before - shard.len();
            })
            .await;
        removed
    }
}
