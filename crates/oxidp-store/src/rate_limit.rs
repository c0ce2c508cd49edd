//! Fixed-window rate counters.
//!
//! The window boundary is `floor(now / window) * window`, so all callers of
//! a key share the same window regardless of when they first hit it. The
//! store itself cannot fail; fail-open versus fail-closed policy for
//! adapter-backed deployments lives with the endpoints that consult it.

use std::collections::HashMap;
use std::sync::Arc;

use oxidp_core::clock::{Clock, UnixMillis};

use crate::error::StoreError;
use crate::shard::Sharded;

/// Outcome of one increment.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// Whether this request is inside the limit.
    pub allowed: bool,

    /// Requests counted in the current window, including this one.
    pub current: u64,

    /// Configured maximum for the window.
    pub limit: u64,

    /// Seconds until the window resets; set when `allowed` is false.
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: UnixMillis,
    count: u64,
}

/// Sharded fixed-window rate counter.
pub struct RateLimiter {
    shards: Sharded<HashMap<String, Window>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates the limiter with `shards` shards (power of two).
    pub fn new(shards: usize, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Self {
            shards: Sharded::new(shards, HashMap::new)?,
            clock,
        })
    }

    /// Counts one request against `key` and decides whether it is allowed.
    pub async fn increment(
        &self,
        key: &str,
        window_secs: u64,
        max_requests: u64,
    ) -> RateLimitDecision {
        let window_ms = window_secs.saturating_mul(1_000);
        let now = self.clock.now_ms();
        let window_start = if window_ms == 0 { now } else { (now / window_ms) * window_ms };

        let mut shard = self.shards.shard(key).lock().await;
        let window = shard
            .entry(key.to_string())
            .and_modify(|w| {
                if w.started_at != window_start {
                    w.started_at = window_start;
                    w.count = 0;
                }
            })
            .or_insert(Window {
                started_at: window_start,
                count: 0,
            });

        window.count += 1;
        let allowed = window.count <= max_requests;
        let retry_after_secs = if allowed {
            None
        } else {
            let window_end = window_start.saturating_add(window_ms);
            Some((window_end.saturating_sub(now)).div_ceil(1_000))
        };

        RateLimitDecision {
            allowed,
            current: window.count,
            limit: max_requests,
            retry_after_secs,
        }
    }

    /// Drops counters whose window has passed. Returns how many were removed.
    pub async fn prune_expired(&self, window_secs: u64) -> usize {
        let window_ms = window_secs.saturating_mul(1_000);
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.shards
            .for_each(|shard| {
                let before = shard.len();
                shard.retain(|_, w| now < w.started_at.saturating_add(window_ms));
                removed += before - shard.len();
            })
            .await;
        removed
    }
}
