//! Shard dispatch.
//!
//! A [`Sharded<S>`] owns `N` copies of some state `S`, each behind its own
//! async mutex. `N` is a power of two. Keys route to shards by the first
//! eight bytes of their SHA-256 digest; UUID keys use their first eight raw
//! bytes directly, since they are already uniformly random.

use tokio::sync::Mutex;
use uuid::Uuid;

use oxidp_core::token::shard_hash;

use crate::error::StoreError;

/// Fixed-count sharded state with one logical writer per shard.
pub struct Sharded<S> {
    shards: Box<[Mutex<S>]>,
    mask: u64,
}

impl<S> Sharded<S> {
    /// Creates `count` shards, each initialized by `init`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] unless `count` is a nonzero
    /// power of two.
    pub fn new(count: usize, mut init: impl FnMut() -> S) -> Result<Self, StoreError> {
        if count == 0 || !count.is_power_of_two() {
            return Err(StoreError::invalid_config(format!(
                "shard count must be a nonzero power of two, got {count}"
            )));
        }

        let shards: Box<[Mutex<S>]> = (0..count).map(|_| Mutex::new(init())).collect();
        Ok(Self {
            shards,
            mask: (count as u64) - 1,
        })
    }

    /// Number of shards.
    #[must_use]
    pub fn count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index for a string key.
    #[must_use]
    pub fn index_of(&self, key: &str) -> usize {
        (shard_hash(key) & self.mask) as usize
    }

    /// The shard owning a string key.
    #[must_use]
    pub fn shard(&self, key: &str) -> &Mutex<S> {
        &self.shards[self.index_of(key)]
    }

    /// The shard owning a UUID key.
    ///
    /// UUIDs are uniformly random already, so the first eight bytes are used
    /// without rehashing.
    #[must_use]
    pub fn shard_for_uuid(&self, key: &Uuid) -> &Mutex<S> {
        let bytes = key.as_bytes();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&bytes[..8]);
        let idx = (u64::from_be_bytes(prefix) & self.mask) as usize;
        &self.shards[idx]
    }

    /// Visits every shard in turn, locking one at a time.
    ///
    /// Used by maintenance sweeps (`prune_expired`). Never holds more than
    /// one shard lock, so it cannot deadlock against request traffic.
    pub async fn for_each(&self, mut f: impl FnMut(&mut S)) {
        for shard in &self.shards {
            let mut guard = shard.lock().await;
            f(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(Sharded::<()>::new(0, || ()).is_err());
        assert!(Sharded::<()>::new(3, || ()).is_err());
        assert!(Sharded::<()>::new(48, || ()).is_err());
    }

    #[test]
    fn test_accepts_powers_of_two() {
        for count in [1usize, 2, 16, 32, 64] {
            let sharded = Sharded::new(count, Vec::<u8>::new).unwrap();
            assert_eq!(sharded.count(), count);
        }
    }

    #[test]
    fn test_routing_is_stable_and_in_range() {
        let sharded = Sharded::new(16, || ()).unwrap();
        for key in ["a", "session:123", "code:xyz", ""] {
            let idx = sharded.index_of(key);
            assert!(idx < 16);
            assert_eq!(idx, sharded.index_of(key));
        }
    }

    #[test]
    fn test_keys_spread_across_shards() {
        let sharded = Sharded::new(16, || ()).unwrap();
        let mut seen = std::collections::HashSet::new();
        for i in 0..256 {
            seen.insert(sharded.index_of(&format!("key-{i}")));
        }
        // 256 uniform keys across 16 shards should hit most of them.
        assert!(seen.len() >= 12, "only {} shards hit", seen.len());
    }

    #[tokio::test]
    async fn test_for_each_visits_every_shard() {
        let sharded = Sharded::new(8, || 0u32).unwrap();
        sharded.for_each(|v| *v += 1).await;

        let mut total = 0;
        sharded.for_each(|v| total += *v).await;
        assert_eq!(total, 8);
    }
}
