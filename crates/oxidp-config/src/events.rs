//! Settings lifecycle events.

use tracing::{info, warn};

/// Events emitted by the settings engine.
#[derive(Debug, Clone)]
pub enum SettingsEvent {
    /// A new version was written.
    VersionWritten {
        /// Settings category.
        category: String,
        /// The new version number.
        version: u64,
        /// Actor that wrote it.
        actor: String,
    },

    /// A rollback started.
    RollbackStarted {
        /// Settings category.
        category: String,
        /// Target version being restored.
        target_version: u64,
    },

    /// A rollback finished; the restored snapshot is live.
    RollbackCompleted {
        /// Settings category.
        category: String,
        /// Target version restored.
        target_version: u64,
        /// The version the rollback wrote.
        new_version: u64,
    },

    /// A rollback failed; the live settings are unchanged.
    RollbackFailed {
        /// Settings category.
        category: String,
        /// Target version that failed to restore.
        target_version: u64,
        /// Failure description.
        reason: String,
    },
}

/// Sink for settings events.
pub trait EventSink: Send + Sync {
    /// Delivers one event.
    fn emit(&self, event: SettingsEvent);
}

/// Default sink: structured logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SettingsEvent) {
        match event {
            SettingsEvent::VersionWritten {
                category,
                version,
                actor,
            } => info!(category, version, actor, "settings version written"),
            SettingsEvent::RollbackStarted {
                category,
                target_version,
            } => info!(category, target_version, "settings rollback started"),
            SettingsEvent::RollbackCompleted {
                category,
                target_version,
                new_version,
            } => info!(
                category,
                target_version, new_version, "settings rollback completed"
            ),
            SettingsEvent::RollbackFailed {
                category,
                target_version,
                reason,
            } => warn!(category, target_version, reason, "settings rollback failed"),
        }
    }
}
