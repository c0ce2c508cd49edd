//! Partition settings cache.
//!
//! Resolution consults the settings on every user creation, so the current
//! snapshot is cached with a short TTL. Expired entries are cleaned
//! probabilistically - roughly one read in ten sweeps the map - with a
//! forced sweep once the map grows past a bound, so the cache cannot grow
//! without limit even under a churn of keys.

use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;

use oxidp_core::clock::{Clock, UnixMillis};

use crate::DirectoryResult;
use crate::partition::{PartitionSettings, SettingsSource};

/// Maximum cache TTL: 10 seconds.
const MAX_TTL_MS: u64 = 10_000;

/// Cleanup probability per read: 10%.
const CLEANUP_PROBABILITY: f64 = 0.1;

/// Entry bound that forces a cleanup.
const FORCED_CLEANUP_LEN: usize = 100;

struct CacheEntry {
    settings: Arc<PartitionSettings>,
    expires_at: UnixMillis,
}

/// TTL cache over a [`SettingsSource`], keyed by settings scope.
///
/// The common deployment has one scope (`"partition"`), but per-tenant
/// overlays use their own keys, hence the bounded-map hygiene.
pub struct SettingsCache {
    source: Arc<dyn SettingsSource>,
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
}

impl SettingsCache {
    /// Creates a cache over `source`. The TTL is clamped to 10 s.
    #[must_use]
    pub fn new(source: Arc<dyn SettingsSource>, clock: Arc<dyn Clock>, ttl_ms: u64) -> Self {
        Self {
            source,
            entries: DashMap::new(),
            clock,
            ttl_ms: ttl_ms.min(MAX_TTL_MS),
        }
    }

    /// Returns the settings for `scope`, loading through the source when
    /// the cached copy is missing or stale.
    pub async fn get(&self, scope: &str) -> DirectoryResult<Arc<PartitionSettings>> {
        let now = self.clock.now_ms();
        self.maybe_cleanup(now);

        if let Some(entry) = self.entries.get(scope)
            && now < entry.expires_at
        {
            return Ok(entry.settings.clone());
        }

        let settings = Arc::new(self.source.load().await?);
        self.entries.insert(
            scope.to_string(),
            CacheEntry {
                settings: settings.clone(),
                expires_at: now.saturating_add(self.ttl_ms),
            },
        );
        Ok(settings)
    }

    /// Drops the cached copy of `scope`, forcing the next read through.
    pub fn invalidate(&self, scope: &str) {
        self.entries.remove(scope);
    }

    /// Number of live cache entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn maybe_cleanup(&self, now: UnixMillis) {
        let forced = self.entries.len() > FORCED_CLEANUP_LEN;
        if !forced && rand::thread_rng().r#gen::<f64>() >= CLEANUP_PROBABILITY {
            return;
        }
        self.entries.retain(|_, entry| now < entry.expires_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oxidp_core::clock::ManualClock;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingSource {
        loads: AtomicU64,
    }

    #[async_trait]
    impl SettingsSource for CountingSource {
        async fn load(&self) -> DirectoryResult<PartitionSettings> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(PartitionSettings {
                default_partition: "default".into(),
                ip_routing_enabled: false,
                available_partitions: vec!["default".into()],
                tenant_partitions: Default::default(),
                partition_rules: vec![],
                updated_at: 0,
                updated_by: None,
            })
        }
    }

    fn cache(clock: Arc<ManualClock>) -> (SettingsCache, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            loads: AtomicU64::new(0),
        });
        (
            SettingsCache::new(source.clone(), clock, 10_000),
            source,
        )
    }

    #[tokio::test]
    async fn test_cache_hit_within_ttl() {
        let clock = ManualClock::shared(0);
        let (cache, source) = cache(clock.clone());

        cache.get("partition").await.unwrap();
        cache.get("partition").await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        clock.advance(9_999);
        cache.get("partition").await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_reload_after_ttl() {
        let clock = ManualClock::shared(0);
        let (cache, source) = cache(clock.clone());

        cache.get("partition").await.unwrap();
        clock.advance(10_001);
        cache.get("partition").await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let clock = ManualClock::shared(0);
        let (cache, source) = cache(clock);

        cache.get("partition").await.unwrap();
        cache.invalidate("partition");
        cache.get("partition").await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_forced_cleanup_bounds_growth() {
        let clock = ManualClock::shared(0);
        let (cache, _source) = cache(clock.clone());

        for i in 0..=FORCED_CLEANUP_LEN {
            cache.get(&format!("scope-{i}")).await.unwrap();
        }
        assert!(cache.len() > FORCED_CLEANUP_LEN);

        // Everything expires; the next read past the bound sweeps.
        clock.advance(10_001);
        cache.get("fresh").await.unwrap();
        assert!(cache.len() <= 2, "cache kept {} entries", cache.len());
    }

    #[tokio::test]
    async fn test_ttl_clamped() {
        let clock = ManualClock::shared(0);
        let source = Arc::new(CountingSource {
            loads: AtomicU64::new(0),
        });
        let cache = SettingsCache::new(source.clone(), clock.clone(), 60_000);

        cache.get("partition").await.unwrap();
        clock.advance(10_001);
        cache.get("partition").await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }
}
