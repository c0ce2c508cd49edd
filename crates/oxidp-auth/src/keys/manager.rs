//! The per-tenant key manager.

use std::collections::HashMap;
use std::sync::Arc;

use jsonwebtoken::Header;
use serde::Serialize;
use tracing::info;

use oxidp_core::clock::{Clock, UnixMillis};
use oxidp_store::Sharded;

use crate::AuthResult;
use crate::error::AuthError;
use crate::keys::material::{Jwks, SigningAlgorithm, SigningKey};

struct AlgKeys {
    active: Arc<SigningKey>,
    next: Arc<SigningKey>,
    retired: Vec<(Arc<SigningKey>, UnixMillis)>,
}

#[derive(Default)]
struct TenantKeyring {
    algs: HashMap<SigningAlgorithm, AlgKeys>,
}

/// Per-tenant signing key manager.
///
/// Tenants shard by tenant id; all keyring mutation for a tenant serializes
/// through its shard. Signing clones the active key's `Arc` under the lock
/// and performs the actual signature outside it.
pub struct KeyManager {
    shards: Sharded<HashMap<String, TenantKeyring>>,
    clock: Arc<dyn Clock>,
    grace_ms: u64,
    algorithms: Vec<SigningAlgorithm>,
}

impl KeyManager {
    /// Creates the manager.
    ///
    /// `algorithms` is the set provisioned for every tenant; `grace_secs`
    /// is how long retired keys stay published.
    pub fn new(
        shards: usize,
        clock: Arc<dyn Clock>,
        algorithms: Vec<SigningAlgorithm>,
        grace_secs: u64,
    ) -> AuthResult<Self> {
        if algorithms.is_empty() {
            return Err(AuthError::internal("key manager needs at least one algorithm"));
        }
        Ok(Self {
            shards: Sharded::new(shards, HashMap::new)
                .map_err(|e| AuthError::internal(e.to_string()))?,
            clock,
            grace_ms: grace_secs.saturating_mul(1_000),
            algorithms,
        })
    }

    /// Returns the active key for `(tenant, alg)`, provisioning the tenant's
    /// keyring on first touch.
    pub async fn active_key(
        &self,
        tenant_id: &str,
        alg: SigningAlgorithm,
    ) -> AuthResult<Arc<SigningKey>> {
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard(tenant_id).lock().await;
        let keyring = self.keyring_mut(&mut shard, tenant_id, now)?;
        let keys = keyring
            .algs
            .get(&alg)
            .ok_or_else(|| AuthError::internal(format!("algorithm {alg} not provisioned")))?;
        Ok(keys.active.clone())
    }

    /// Signs `claims` with the tenant's active key for `alg`.
    ///
    /// The JWS header carries the key id; verification picks the key out of
    /// the published JWKS by `kid`.
    pub async fn sign<T: Serialize>(
        &self,
        tenant_id: &str,
        alg: SigningAlgorithm,
        claims: &T,
    ) -> AuthResult<String> {
        let key = self.active_key(tenant_id, alg).await?;

        // The shard lock is released; signing is pure CPU on immutable key
        // material.
        let mut header = Header::new(alg.to_jwt_algorithm());
        header.kid = Some(key.kid.clone());
        jsonwebtoken::encode(&header, claims, key.encoding_key())
            .map_err(|e| AuthError::internal(format!("signing failed: {e}")))
    }

    /// Rotates the tenant's key for `alg`: active retires, next activates,
    /// a fresh next is generated.
    pub async fn rotate(&self, tenant_id: &str, alg: SigningAlgorithm) -> AuthResult<()> {
        let now = self.clock.now_ms();
        let fresh = Arc::new(SigningKey::generate(alg, now)?);

        let mut shard = self.shards.shard(tenant_id).lock().await;
        let keyring = self.keyring_mut(&mut shard, tenant_id, now)?;
        let keys = keyring
            .algs
            .get_mut(&alg)
            .ok_or_else(|| AuthError::internal(format!("algorithm {alg} not provisioned")))?;

        let retired = std::mem::replace(&mut keys.active, keys.next.clone());
        keys.next = fresh;
        keys.retired.push((retired, now));

        let grace_ms = self.grace_ms;
        keys.retired
            .retain(|(_, retired_at)| now < retired_at.saturating_add(grace_ms));

        info!(tenant_id, alg = %alg, "rotated signing key");
        Ok(())
    }

    /// The tenant's published JWKS: active and next keys, plus retired keys
    /// still inside the grace period.
    pub async fn public_jwks(&self, tenant_id: &str) -> AuthResult<Jwks> {
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard(tenant_id).lock().await;
        let keyring = self.keyring_mut(&mut shard, tenant_id, now)?;

        let mut jwks = Jwks::default();
        for keys in keyring.algs.values() {
            jwks.keys.push(keys.active.to_jwk());
            jwks.keys.push(keys.next.to_jwk());
            for (retired, retired_at) in &keys.retired {
                if now < retired_at.saturating_add(self.grace_ms) {
                    jwks.keys.push(retired.to_jwk());
                }
            }
        }
        Ok(jwks)
    }

    /// Finds a verification key by `kid`, searching active, next, and
    /// retired-within-grace keys.
    pub async fn verification_key(
        &self,
        tenant_id: &str,
        kid: &str,
    ) -> AuthResult<Option<Arc<SigningKey>>> {
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard(tenant_id).lock().await;
        let keyring = self.keyring_mut(&mut shard, tenant_id, now)?;

        for keys in keyring.algs.values() {
            if keys.active.kid == kid {
                return Ok(Some(keys.active.clone()));
            }
            if keys.next.kid == kid {
                return Ok(Some(keys.next.clone()));
            }
            for (retired, retired_at) in &keys.retired {
                if retired.kid == kid && now < retired_at.saturating_add(self.grace_ms) {
                    return Ok(Some(retired.clone()));
                }
            }
        }
        Ok(None)
    }

    fn keyring_mut<'a>(
        &self,
        shard: &'a mut HashMap<String, TenantKeyring>,
        tenant_id: &str,
        now: UnixMillis,
    ) -> AuthResult<&'a mut TenantKeyring> {
        if !shard.contains_key(tenant_id) {
            let mut keyring = TenantKeyring::default();
            for &alg in &self.algorithms {
                keyring.algs.insert(
                    alg,
                    AlgKeys {
                        active: Arc::new(SigningKey::generate(alg, now)?),
                        next: Arc::new(SigningKey::generate(alg, now)?),
                        retired: Vec::new(),
                    },
                );
            }
            info!(tenant_id, "provisioned tenant keyring");
            shard.insert(tenant_id.to_string(), keyring);
        }
        Ok(shard.get_mut(tenant_id).expect("just inserted"))
    }
}
