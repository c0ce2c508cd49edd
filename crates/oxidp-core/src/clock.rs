//! Millisecond epoch clock.
//!
//! Every mutable record in the system carries `u64` millisecond timestamps,
//! and every TTL decision compares against "now". Stores take their notion of
//! now from a [`Clock`] handle so tests can drive expiry deterministically
//! instead of sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unsigned milliseconds since the Unix epoch.
pub type UnixMillis = u64;

/// Source of the current time in milliseconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current time as milliseconds since the Unix epoch.
    fn now_ms(&self) -> UnixMillis;
}

/// Wall-clock implementation used everywhere outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> UnixMillis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl SystemClock {
    /// Returns a shared handle to the system clock.
    #[must_use]
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self)
    }
}

/// Manually advanced clock for tests.
///
/// Starts at an arbitrary fixed point and only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock pinned at `start` milliseconds.
    #[must_use]
    pub fn new(start: UnixMillis) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Creates a shared handle pinned at `start`.
    #[must_use]
    pub fn shared(start: UnixMillis) -> Arc<Self> {
        Arc::new(Self::new(start))
    }

    /// Advances the clock by `delta_ms` milliseconds.
    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Pins the clock to an absolute timestamp.
    pub fn set(&self, now: UnixMillis) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> UnixMillis {
        self.now.load(Ordering::SeqCst)
    }
}
