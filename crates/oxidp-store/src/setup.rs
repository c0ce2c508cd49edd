//! Initial admin setup token.
//!
//! The first-boot setup token is stored under an exclusive key with a short
//! TTL; consuming it records a completion marker that blocks any further
//! token from ever being stored. The comparison is constant-time.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use tokio::sync::Mutex;

use oxidp_core::clock::{Clock, UnixMillis};
use oxidp_core::token::sha256_hex;

use crate::error::StoreError;

/// Default setup token lifetime: 1 hour.
pub const DEFAULT_SETUP_TTL_MS: u64 = 3_600_000;

#[derive(Debug, Default)]
struct SetupState {
    token_hash: Option<String>,
    expires_at: UnixMillis,
    completed: bool,
}

/// At-most-once setup token store.
///
/// A single mutex, not a sharded namespace: there is exactly one setup slot
/// per deployment and it is touched a handful of times ever.
pub struct SetupTokenStore {
    state: Mutex<SetupState>,
    clock: Arc<dyn Clock>,
}

impl SetupTokenStore {
    /// Creates the store.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(SetupState::default()),
            clock,
        }
    }

    /// Stores the setup token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SetupCompleted`] once setup has completed;
    /// the marker is permanent and blocks any further token.
    pub async fn store_token(&self, token: &str, ttl_ms: u64) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;

        if state.completed {
            return Err(StoreError::SetupCompleted);
        }

        state.token_hash = Some(sha256_hex(token));
        state.expires_at = now.saturating_add(ttl_ms);
        Ok(())
    }

    /// Consumes the setup token, completing setup.
    ///
    /// The stored and presented digests are compared in constant time. On
    /// success the completion marker is set and the token slot cleared in
    /// the same critical section.
    pub async fn consume(&self, token: &str) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;

        if state.completed {
            return Err(StoreError::SetupCompleted);
        }
        let stored = state.token_hash.as_ref().ok_or(StoreError::NotFound)?;
        if now >= state.expires_at {
            return Err(StoreError::Expired);
        }

        let presented = sha256_hex(token);
        if stored.as_bytes().ct_eq(presented.as_bytes()).unwrap_u8() != 1 {
            return Err(StoreError::NotFound);
        }

        state.completed = true;
        state.token_hash = None;
        Ok(())
    }

    /// Whether setup has completed.
    pub async fn is_completed(&self) -> bool {
        self.state.lock().await.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidp_core::clock::ManualClock;

    #[tokio::test]
    async fn test_at_most_once() {
        let clock = ManualClock::shared(0);
        let store = SetupTokenStore::new(clock);

        store.store_token("secret-token", DEFAULT_SETUP_TTL_MS).await.unwrap();

        assert!(matches!(
            store.consume("wrong-token").await,
            Err(StoreError::NotFound)
        ));
        store.consume("secret-token").await.unwrap();
        assert!(store.is_completed().await);

        // Completion blocks everything that follows.
        assert!(matches!(
            store.consume("secret-token").await,
            Err(StoreError::SetupCompleted)
        ));
        assert!(matches!(
            store.store_token("another", DEFAULT_SETUP_TTL_MS).await,
            Err(StoreError::SetupCompleted)
        ));
    }

    #[tokio::test]
    async fn test_token_expires() {
        let clock = ManualClock::shared(0);
        let store = SetupTokenStore::new(clock.clone());

        store.store_token("secret", 1_000).await.unwrap();
        clock.advance(1_001);
        assert!(matches!(
            store.consume("secret").await,
            Err(StoreError::Expired)
        ));

        // Not completed; a fresh token may be stored.
        store.store_token("secret-2", 1_000).await.unwrap();
        store.consume("secret-2").await.unwrap();
    }

    #[tokio::test]
    async fn test_consume_without_token() {
        let clock = ManualClock::shared(0);
        let store = SetupTokenStore::new(clock);
        assert!(matches!(
            store.consume("anything").await,
            Err(StoreError::NotFound)
        ));
    }
}
