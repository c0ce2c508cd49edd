//! Background maintenance.
//!
//! Expired entries in the sharded stores are dropped lazily on access, but
//! keys that are never touched again would pin memory forever. A periodic
//! sweep visits every store; each sweep locks one shard at a time, so it
//! never contends with request traffic for long.

use std::time::Duration;

use tracing::debug;

use crate::bootstrap::MaintenanceTargets;

/// Sweep interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Rate-counter window assumed by the sweeper; counters for longer windows
/// are swept on a later pass once their window lapses.
const COUNTER_WINDOW_SECS: u64 = 60;

/// Runs the maintenance loop until the process exits.
pub async fn run(targets: MaintenanceTargets) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let removed = sweep(&targets).await;
        if removed > 0 {
            debug!(removed, "maintenance sweep dropped expired entries");
        }
    }
}

async fn sweep(targets: &MaintenanceTargets) -> usize {
    let mut removed = 0;
    removed += targets.sessions.prune_expired().await;
    removed += targets.codes.prune_expired().await;
    removed += targets.rotator.prune_expired().await;
    removed += targets.challenges.prune_expired().await;
    removed += targets.devices.prune_expired().await;
    removed += targets.ciba.prune_expired().await;
    removed += targets.jtis.prune_expired().await;
    removed += targets.revocations.prune_expired().await;
    removed += targets.par.prune_expired().await;
    removed += targets.flows.prune_expired().await;
    removed += targets.limiter.prune_expired(COUNTER_WINDOW_SECS).await;
    removed
}
