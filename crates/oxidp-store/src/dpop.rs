//! DPoP JTI replay barrier.
//!
//! Every DPoP proof carries a fresh `jti`. The store answers `true` the
//! first time a jti is presented inside its TTL window and `false` for
//! every repeat, which is the entire replay defense.

use std::collections::HashMap;
use std::sync::Arc;

use oxidp_core::clock::{Clock, UnixMillis};

use crate::error::StoreError;
use crate::shard::Sharded;

/// Sharded first-use barrier for DPoP proof identifiers.
pub struct DpopJtiStore {
    shards: Sharded<HashMap<String, UnixMillis>>,
    clock: Arc<dyn Clock>,
}

impl DpopJtiStore {
    /// Creates the store with `shards` shards (power of two).
    pub fn new(shards: usize, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Self {
            shards: Sharded::new(shards, HashMap::new)?,
            clock,
        })
    }

    /// Records a jti. Returns `true` exactly once per jti within its TTL.
    ///
    /// An expired entry is treated as absent, so a jti whose window has
    /// passed could in principle be accepted again; proofs also carry `iat`
    /// bounds checked by the proof validator, which closes that gap.
    pub async fn seen(&self, jti: &str, ttl_ms: u64) -> bool {
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard(jti).lock().await;

        match shard.get(jti) {
            Some(&expires_at) if now < expires_at => false,
            _ => {
                shard.insert(jti.to_string(), now.saturating_add(ttl_ms));
                true
            }
        }
    }

    /// Drops expired entries. Returns how many were removed.
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidp_core::clock::ManualClock;

    #[tokio::test]
    async fn test_first_use_only() {
        let clock = ManualClock::shared(0);
        let store = DpopJtiStore::new(16, clock).unwrap();

        assert!(store.seen("jti-1", 120_000).await);
        assert!(!store.seen("jti-1", 120_000).await);
        assert!(!store.seen("jti-1", 120_000).await);

        assert!(store.seen("jti-2", 120_000).await);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_exactly_once() {
        let clock = ManualClock::shared(0);
        let store = Arc::new(DpopJtiStore::new(16, clock).unwrap());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move { store.seen("jti", 120_000).await }));
        }

        let mut fresh = 0;
        for t in tasks {
            if t.await.unwrap() {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_prunes() {
        let clock = ManualClock::shared(0);
        let store = DpopJtiStore::new(16, clock.clone()).unwrap();

        assert!(store.seen("jti", 60_000).await);
        clock.advance(60_001);
        assert_eq!(store.prune_expired().await, 1);
    }
}
