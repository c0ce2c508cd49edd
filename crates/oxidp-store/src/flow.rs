//! Flow state store.
//!
//! `/authorize` is a multi-step state machine (login, MFA, consent). The
//! steps span separate HTTP requests, so the accumulated state rides in a
//! server-minted `flow_id` with a short TTL.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use oxidp_core::clock::{Clock, UnixMillis};
use oxidp_core::token::generate_token;

use crate::error::StoreError;
use crate::shard::Sharded;

/// Maximum flow lifetime: 10 minutes.
pub const MAX_FLOW_TTL_MS: u64 = 600_000;

/// Where a flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    /// Waiting for primary credentials.
    Login,
    /// Primary factor done; waiting for the second factor.
    Mfa,
    /// Authenticated; waiting for consent.
    Consent,
}

/// Accumulated state of one `/authorize` flow.
#[derive(Debug, Clone)]
pub struct FlowState {
    /// Server-minted flow identifier.
    pub flow_id: String,

    /// Owning tenant.
    pub tenant_id: String,

    /// Client that started the flow.
    pub client_id: String,

    /// Snapshot of the validated authorization request parameters.
    pub request: Value,

    /// Current stage.
    pub stage: FlowStage,

    /// Authenticated user, once login succeeded.
    pub user_id: Option<String>,

    /// Authentication method references accumulated so far.
    pub amr: Vec<String>,

    /// Authentication context class reference.
    pub acr: Option<String>,

    /// When the user authenticated, epoch seconds.
    pub auth_time: Option<u64>,

    /// Creation time, epoch milliseconds.
    pub created_at: UnixMillis,

    /// Expiry, epoch milliseconds.
    pub expires_at: UnixMillis,
}

/// Sharded flow state store.
pub struct FlowStateStore {
    shards: Sharded<HashMap<String, FlowState>>,
    clock: Arc<dyn Clock>,
}

impl FlowStateStore {
    /// Creates the store with `shards` shards (power of two).
    pub fn new(shards: usize, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Self {
            shards: Sharded::new(shards, HashMap::new)?,
            clock,
        })
    }

    /// Starts a flow. The TTL is clamped to 10 minutes.
    pub async fn create(
        &self,
        tenant_id: &str,
        client_id: &str,
        request: Value,
        ttl_ms: u64,
    ) -> FlowState {
        let now = self.clock.now_ms();
        let flow_id = generate_token(32);
        let state = FlowState {
            flow_id: flow_id.clone(),
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            request,
            stage: FlowStage::Login,
            user_id: None,
            amr: Vec::new(),
            acr: None,
            auth_time: None,
            created_at: now,
            expires_at: now.saturating_add(ttl_ms.min(MAX_FLOW_TTL_MS)),
        };

        let mut shard = self.shards.shard(&flow_id).lock().await;
        shard.insert(flow_id, state.clone());
        state
    }

    /// Returns a live flow.
    pub async fn get(&self, flow_id: &str) -> Result<FlowState, StoreError> {
        let now = self.clock.now_ms();
        let shard = self.shards.shard(flow_id).lock().await;
        match shard.get(flow_id) {
            Some(state) if now < state.expires_at => Ok(state.clone()),
            Some(_) => Err(StoreError::Expired),
            None => Err(StoreError::NotFound),
        }
    }

    /// Applies a mutation to a live flow under the shard lock.
    pub async fn update(
        &self,
        flow_id: &str,
        f: impl FnOnce(&mut FlowState) + Send,
    ) -> Result<FlowState, StoreError> {
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard(flow_id).lock().await;
        let state = shard.get_mut(flow_id).ok_or(StoreError::NotFound)?;
        if now >= state.expires_at {
            return Err(StoreError::Expired);
        }
        f(state);
        Ok(state.clone())
    }

    /// Removes a finished flow and returns its final state.
    pub async fn consume(&self, flow_id: &str) -> Result<FlowState, StoreError> {
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard(flow_id).lock().await;
        let state = shard.remove(flow_id).ok_or(StoreError::NotFound)?;
        if now >= state.expires_at {
            return Err(StoreError::Expired);
        }
        Ok(state)
    }

    /// Drops expired flows. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.shards
            .for_each(|shard| {
                let before = shard.len();
                shard.retain(|_, s| now < s.expires_at);
                removed += before - shard.len();
            })
            .await;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use oxidp_core::clock::ManualClock;

    #[tokio::test]
    async fn test_login_mfa_consent_progression() {
        let clock = ManualClock::shared(0);
        let store = FlowStateStore::new(32, clock).unwrap();

        let flow = store
            .create("acme", "client-1", json!({"scope": "openid"}), 600_000)
            .await;
        assert_eq!(flow.stage, FlowStage::Login);

        store
            .update(&flow.flow_id, |s| {
                s.user_id = Some("user-1".into());
                s.amr.push("pwd".into());
                s.auth_time = Some(1_700_000_000);
                s.stage = FlowStage::Mfa;
            })
            .await
            .unwrap();

        let updated = store
            .update(&flow.flow_id, |s| {
                s.amr.push("otp".into());
                s.stage = FlowStage::Consent;
            })
            .await
            .unwrap();
        assert_eq!(updated.amr, vec!["pwd".to_string(), "otp".to_string()]);

        let done = store.consume(&flow.flow_id).await.unwrap();
        assert_eq!(done.stage, FlowStage::Consent);
        assert!(matches!(
            store.get(&flow.flow_id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_ttl_clamped_to_ten_minutes() {
        let clock = ManualClock::shared(0);
        let store = FlowStateStore::new(32, clock.clone()).unwrap();
        let flow = store.create("acme", "c", json!({}), u64::MAX).await;

        clock.advance(MAX_FLOW_TTL_MS + 1);
        assert!(matches!(
            store.get(&flow.flow_id).await,
            Err(StoreError::Expired)
        ));
        assert!(matches!(
            store.consume(&flow.flow_id).await,
            Err(StoreError::Expired)
        ));
    }
}
