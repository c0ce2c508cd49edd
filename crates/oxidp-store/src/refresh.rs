//! Refresh token rotator.
//!
//! A refresh token family is the chain of handles derived from one
//! authorization. Rotation moves the tip forward; every superseded handle
//! stays on record. Presenting any non-tip handle is reuse: the whole family
//! is revoked in the same critical section and the caller answers
//! `invalid_grant`.
//!
//! The wire handle embeds the family UUID in front of the random part, so an
//! exchange routes straight to the family's shard and the rotation (mint
//! successor, persist supersession, invalidate predecessor) happens as one
//! unit under that shard's lock.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::warn;
use uuid::Uuid;

use oxidp_core::clock::{Clock, UnixMillis};
use oxidp_core::token::sha256_hex;

use crate::error::StoreError;
use crate::shard::Sharded;

/// Maximum refresh token lifetime: 30 days.
const MAX_REFRESH_TTL_MS: u64 = 30 * 24 * 60 * 60 * 1_000;

/// Random bytes per handle, on top of the 16-byte family prefix.
const HANDLE_RANDOM_BYTES: usize = 32;

/// Attributes fixed when a family is minted.
#[derive(Debug, Clone)]
pub struct RefreshMint {
    /// Client the family belongs to.
    pub client_id: String,

    /// Authorizing user.
    pub user_id: String,

    /// Granted scopes (space-separated).
    pub scope: String,

    /// Authentication context class reference.
    pub acr: Option<String>,

    /// Authentication method references.
    pub amr: Vec<String>,

    /// DPoP key thumbprint when the grant is DPoP-bound. Inherited by every
    /// handle in the family.
    pub dpop_jkt: Option<String>,

    /// When the user originally authenticated, epoch seconds. Carried so ID
    /// tokens minted on refresh keep the original `auth_time`.
    pub auth_time: u64,

    /// Per-handle lifetime; clamped to 30 days.
    pub ttl_ms: u64,
}

/// Claims carried by a family, returned on every successful exchange.
#[derive(Debug, Clone)]
pub struct RefreshClaims {
    /// Client the family belongs to.
    pub client_id: String,

    /// Authorizing user.
    pub user_id: String,

    /// Granted scopes.
    pub scope: String,

    /// Authentication context class reference.
    pub acr: Option<String>,

    /// Authentication method references.
    pub amr: Vec<String>,

    /// Bound DPoP key thumbprint, if any.
    pub dpop_jkt: Option<String>,

    /// When the user originally authenticated, epoch seconds.
    pub auth_time: u64,
}

/// Result of a successful rotation.
#[derive(Debug, Clone)]
pub struct RefreshRotation {
    /// The new tip handle, returned to the client.
    pub new_handle: String,

    /// Family identifier.
    pub family_id: String,

    /// Family claims for minting the fresh access / ID tokens.
    pub claims: RefreshClaims,
}

#[derive(Debug, Clone)]
struct HandleRecord {
    issued_at: UnixMillis,
    expires_at: UnixMillis,
    previous_handle: Option<String>,
    superseded_by: Option<String>,
    revoked_at: Option<UnixMillis>,
}

#[derive(Debug)]
struct Family {
    claims: RefreshClaims,
    ttl_ms: u64,
    revoked: bool,
    tip: String,
    handles: HashMap<String, HandleRecord>,
}

/// Sharded refresh token rotator. Families shard by family UUID.
pub struct RefreshTokenRotator {
    shards: Sharded<HashMap<Uuid, Family>>,
    clock: Arc<dyn Clock>,
}

impl RefreshTokenRotator {
    /// Creates the rotator with `shards` shards (power of two).
    pub fn new(shards: usize, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Self {
            shards: Sharded::new(shards, HashMap::new)?,
            clock,
        })
    }

    /// Mints a new family and returns its first handle.
    pub async fn mint(&self, attrs: RefreshMint) -> RefreshRotation {
        let family_id = Uuid::new_v4();
        let now = self.clock.now_ms();
        let ttl_ms = attrs.ttl_ms.min(MAX_REFRESH_TTL_MS);

        let handle = encode_handle(&family_id);
        let digest = sha256_hex(&handle);

        let claims = RefreshClaims {
            client_id: attrs.client_id,
            user_id: attrs.user_id,
            scope: attrs.scope,
            acr: attrs.acr,
            amr: attrs.amr,
            dpop_jkt: attrs.dpop_jkt,
            auth_time: attrs.auth_time,
        };

        let family = Family {
            claims: claims.clone(),
            ttl_ms,
            revoked: false,
            tip: digest.clone(),
            handles: HashMap::from([(
                digest,
                HandleRecord {
                    issued_at: now,
                    expires_at: now.saturating_add(ttl_ms),
                    previous_handle: None,
                    superseded_by: None,
                    revoked_at: None,
                },
            )]),
        };

        let mut shard = self.shards.shard_for_uuid(&family_id).lock().await;
        shard.insert(family_id, family);

        RefreshRotation {
            new_handle: handle,
            family_id: family_id.to_string(),
            claims,
        }
    }

    /// Exchanges a handle for its successor.
    ///
    /// Rotation is all-or-nothing: the successor is minted, the supersession
    /// recorded, and the predecessor invalidated inside one shard critical
    /// section. Presenting a non-tip handle revokes the entire family and
    /// fails with [`StoreError::ReuseDetected`].
    pub async fn exchange(
        &self,
        handle: &str,
        client_id: &str,
        dpop_jkt: Option<&str>,
    ) -> Result<RefreshRotation, StoreError> {
        let family_id = decode_family(handle).ok_or(StoreError::NotFound)?;
        let now = self.clock.now_ms();
        let digest = sha256_hex(handle);

        let mut shard = self.shards.shard_for_uuid(&family_id).lock().await;
        let family = shard.get_mut(&family_id).ok_or(StoreError::NotFound)?;

        if family.revoked {
            return Err(StoreError::Revoked);
        }

        // Unknown random part within a known family: treat like any other
        // bad credential against this family and revoke it.
        let Some(record) = family.handles.get(&digest) else {
            warn!(family_id = %family_id, "unknown handle presented against live family; revoking");
            revoke_family_records(family, now);
            return Err(StoreError::ReuseDetected {
                family_id: family_id.to_string(),
            });
        };

        if record.superseded_by.is_some() || record.revoked_at.is_some() {
            warn!(family_id = %family_id, "superseded refresh handle presented; revoking family");
            revoke_family_records(family, now);
            return Err(StoreError::ReuseDetected {
                family_id: family_id.to_string(),
            });
        }

        if now >= record.expires_at {
            return Err(StoreError::Expired);
        }
        if family.claims.client_id != client_id {
            return Err(StoreError::ClientMismatch);
        }
        if let Some(bound) = &family.claims.dpop_jkt {
            match dpop_jkt {
                Some(presented) if presented == bound => {}
                _ => return Err(StoreError::DpopMismatch),
            }
        }

        // Rotate: mint successor, record supersession, move the tip.
        let new_handle = encode_handle(&family_id);
        let new_digest = sha256_hex(&new_handle);
        let ttl_ms = family.ttl_ms;

        family.handles.insert(
            new_digest.clone(),
            HandleRecord {
                issued_at: now,
                expires_at: now.saturating_add(ttl_ms),
                previous_handle: Some(digest.clone()),
                superseded_by: None,
                revoked_at: None,
            },
        );
        if let Some(old) = family.handles.get_mut(&digest) {
            old.superseded_by = Some(new_digest.clone());
        }
        family.tip = new_digest;

        Ok(RefreshRotation {
            new_handle,
            family_id: family_id.to_string(),
            claims: family.claims.clone(),
        })
    }

    /// Read-only view of a handle, for introspection.
    ///
    /// Succeeds only for the live tip of an unrevoked family. Unlike
    /// [`RefreshTokenRotator::exchange`], a non-tip handle here does not
    /// trigger reuse revocation: introspection must never mutate state.
    pub async fn inspect(&self, handle: &str) -> Result<RefreshClaims, StoreError> {
        let family_id = decode_family(handle).ok_or(StoreError::NotFound)?;
        let now = self.clock.now_ms();
        let digest = sha256_hex(handle);

        let shard = self.shards.shard_for_uuid(&family_id).lock().await;
        let family = shard.get(&family_id).ok_or(StoreError::NotFound)?;

        if family.revoked {
            return Err(StoreError::Revoked);
        }
        let record = family.handles.get(&digest).ok_or(StoreError::NotFound)?;
        if record.superseded_by.is_some() || record.revoked_at.is_some() {
            return Err(StoreError::Revoked);
        }
        if now >= record.expires_at {
            return Err(StoreError::Expired);
        }
        Ok(family.claims.clone())
    }

    /// Revokes a family. Idempotent; unknown families are not an error.
    pub async fn revoke_family(&self, family_id: &str) {
        let Ok(family_id) = Uuid::parse_str(family_id) else {
            return;
        };
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard_for_uuid(&family_id).lock().await;
        if let Some(family) = shard.get_mut(&family_id) {
            revoke_family_records(family, now);
        }
    }

    /// Extracts the family id embedded in a wire handle, if it parses.
    #[must_use]
    pub fn family_of(handle: &str) -> Option<String> {
        decode_family(handle).map(|id| id.to_string())
    }

    /// Returns `true` if the family exists and is revoked.
    pub async fn is_family_revoked(&self, family_id: &str) -> bool {
        let Ok(family_id) = Uuid::parse_str(family_id) else {
            return false;
        };
        let shard = self.shards.shard_for_uuid(&family_id).lock().await;
        shard.get(&family_id).is_some_and(|f| f.revoked)
    }

    /// Drops families whose every handle has expired. Returns how many were
    /// removed.
    pub async fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.shards
            .for_each(|shard| {
                let before = shard.len();
                shard.retain(|_, family| {
                    family.handles.values().any(|h| now < h.expires_at)
                });
                removed += before - shard.len();
            })
            .await;
        removed
    }
}

fn revoke_family_records(family: &mut Family, now: UnixMillis) {
    family.revoked = true;
    for record in family.handles.values_mut() {
        record.revoked_at.get_or_insert(now);
    }
}

/// Encodes a fresh handle: 16 family-UUID bytes then 32 random bytes,
/// base64url without padding.
fn encode_handle(family_id: &Uuid) -> String {
    let mut bytes = [0u8; 16 + HANDLE_RANDOM_BYTES];
    bytes[..16].copy_from_slice(family_id.as_bytes());
    oxidp_core::token::fill_random(&mut bytes[16..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Extracts the family UUID from a wire handle.
fn decode_family(handle: &str) -> Option<Uuid> {
    let bytes = URL_SAFE_NO_PAD.decode(handle).ok()?;
    if bytes.len() != 16 + HANDLE_RANDOM_BYTES {
        return None;
    }
    Uuid::from_slice(&bytes[..16]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidp_core::clock::ManualClock;

    fn mint_attrs() -> RefreshMint {
        RefreshMint {
            client_id: "client-1".into(),
            user_id: "user-1".into(),
            scope: "openid offline_access".into(),
            acr: None,
            amr: vec!["pwd".into()],
            dpop_jkt: None,
            auth_time: 1_699_999_000,
            ttl_ms: 7 * 24 * 60 * 60 * 1_000,
        }
    }

    #[tokio::test]
    async fn test_mint_then_exchange_rotates() {
        let clock = ManualClock::shared(0);
        let rotator = RefreshTokenRotator::new(32, clock).unwrap();

        let minted = rotator.mint(mint_attrs()).await;
        let rotated = rotator
            .exchange(&minted.new_handle, "client-1", None)
            .await
            .unwrap();

        assert_ne!(rotated.new_handle, minted.new_handle);
        assert_eq!(rotated.family_id, minted.family_id);
        assert_eq!(rotated.claims.scope, "openid offline_access");
    }

    #[tokio::test]
    async fn test_reuse_revokes_whole_family() {
        let clock = ManualClock::shared(0);
        let rotator = RefreshTokenRotator::new(32, clock).unwrap();

        let r1 = rotator.mint(mint_attrs()).await;
        let r2 = rotator.exchange(&r1.new_handle, "client-1", None).await.unwrap();

        // Presenting R1 again is reuse: family revoked.
        match rotator.exchange(&r1.new_handle, "client-1", None).await {
            Err(StoreError::ReuseDetected { family_id }) => {
                assert_eq!(family_id, r1.family_id);
            }
            other => panic!("expected ReuseDetected, got {other:?}"),
        }

        // The tip R2 is dead too.
        assert!(matches!(
            rotator.exchange(&r2.new_handle, "client-1", None).await,
            Err(StoreError::Revoked)
        ));
        assert!(rotator.is_family_revoked(&r1.family_id).await);
    }

    #[tokio::test]
    async fn test_client_binding() {
        let clock = ManualClock::shared(0);
        let rotator = RefreshTokenRotator::new(32, clock).unwrap();

        let minted = rotator.mint(mint_attrs()).await;
        assert!(matches!(
            rotator.exchange(&minted.new_handle, "other", None).await,
            Err(StoreError::ClientMismatch)
        ));
    }

    #[tokio::test]
    async fn test_dpop_binding_inherited() {
        let clock = ManualClock::shared(0);
        let rotator = RefreshTokenRotator::new(32, clock).unwrap();

        let mut attrs = mint_attrs();
        attrs.dpop_jkt = Some("jkt-1".into());
        let minted = rotator.mint(attrs).await;

        assert!(matches!(
            rotator.exchange(&minted.new_handle, "client-1", None).await,
            Err(StoreError::DpopMismatch)
        ));
        assert!(matches!(
            rotator
                .exchange(&minted.new_handle, "client-1", Some("jkt-2"))
                .await,
            Err(StoreError::DpopMismatch)
        ));

        let rotated = rotator
            .exchange(&minted.new_handle, "client-1", Some("jkt-1"))
            .await
            .unwrap();
        assert_eq!(rotated.claims.dpop_jkt.as_deref(), Some("jkt-1"));
    }

    #[tokio::test]
    async fn test_expired_handle() {
        let clock = ManualClock::shared(0);
        let rotator = RefreshTokenRotator::new(32, clock.clone()).unwrap();

        let mut attrs = mint_attrs();
        attrs.ttl_ms = 1_000;
        let minted = rotator.mint(attrs).await;

        clock.advance(1_001);
        assert!(matches!(
            rotator.exchange(&minted.new_handle, "client-1", None).await,
            Err(StoreError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_ttl_clamped_to_thirty_days() {
        let clock = ManualClock::shared(0);
        let rotator = RefreshTokenRotator::new(32, clock.clone()).unwrap();

        let mut attrs = mint_attrs();
        attrs.ttl_ms = u64::MAX;
        let minted = rotator.mint(attrs).await;

        clock.advance(MAX_REFRESH_TTL_MS + 1);
        assert!(matches!(
            rotator.exchange(&minted.new_handle, "client-1", None).await,
            Err(StoreError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_exchange_single_rotation() {
        let clock = ManualClock::shared(0);
        let rotator = Arc::new(RefreshTokenRotator::new(32, clock).unwrap());
        let minted = rotator.mint(mint_attrs()).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let rotator = rotator.clone();
            let handle = minted.new_handle.clone();
            handles.push(tokio::spawn(async move {
                rotator.exchange(&handle, "client-1", None).await.is_ok()
            }));
        }

        let mut successes = 0;
        for h in handles {
            if h.await.unwrap() {
                successes += 1;
            }
        }
        // The first exchange wins; every other presentation of the same
        // handle is reuse.
        assert_eq!(successes, 1);
        assert!(rotator.is_family_revoked(&minted.family_id).await);
    }

    #[tokio::test]
    async fn test_revoke_family_idempotent() {
        let clock = ManualClock::shared(0);
        let rotator = RefreshTokenRotator::new(32, clock).unwrap();
        let minted = rotator.mint(mint_attrs()).await;

        rotator.revoke_family(&minted.family_id).await;
        rotator.revoke_family(&minted.family_id).await;
        rotator.revoke_family("not-a-uuid").await;

        assert!(matches!(
            rotator.exchange(&minted.new_handle, "client-1", None).await,
            Err(StoreError::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_prune_expired_families() {
        let clock = ManualClock::shared(0);
        let rotator = RefreshTokenRotator::new(32, clock.clone()).unwrap();

        let mut short = mint_attrs();
        short.ttl_ms = 1_000;
        rotator.mint(short).await;
        rotator.mint(mint_attrs()).await;

        clock.advance(2_000);
        assert_eq!(rotator.prune_expired().await, 1);
    }

    #[test]
    fn test_handle_encoding_roundtrip() {
        let family = Uuid::new_v4();
        let handle = encode_handle(&family);
        assert_eq!(decode_family(&handle), Some(family));
        assert!(decode_family("too-short").is_none());
    }
}
