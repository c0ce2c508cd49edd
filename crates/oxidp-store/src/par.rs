//! Pushed Authorization Request store (RFC 9126).
//!
//! PAR parameters are pre-registered at `/par` and referenced from
//! `/authorize` by `request_uri`. Requests are client-bound, short-lived
//! (≤ 90 s), and strictly single-use.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use oxidp_core::clock::{Clock, UnixMillis};
use oxidp_core::token::generate_token;

use crate::error::StoreError;
use crate::shard::Sharded;

/// Maximum PAR request lifetime: 90 seconds.
pub const MAX_PAR_TTL_MS: u64 = 90_000;

/// URN prefix for PAR request URIs.
const REQUEST_URI_PREFIX: &str = "urn:ietf:params:oauth:request_uri:";

/// A stored pushed authorization request.
#[derive(Debug, Clone)]
pub struct ParRequest {
    /// The request URI handed back to the client.
    pub request_uri: String,

    /// Client that pushed the request; consumption is bound to it.
    pub client_id: String,

    /// The pushed authorization parameters, as submitted.
    pub parameters: Value,

    /// Expiry, epoch milliseconds.
    pub expires_at: UnixMillis,

    /// Whether the request has been consumed.
    pub consumed: bool,
}

/// Sharded PAR request store.
pub struct ParRequestStore {
    shards: Sharded<HashMap<String, ParRequest>>,
    clock: Arc<dyn Clock>,
}

impl ParRequestStore {
    /// Creates the store with `shards` shards (power of two).
    pub fn new(shards: usize, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Self {
            shards: Sharded::new(shards, HashMap::new)?,
            clock,
        })
    }

    /// Stores pushed parameters and mints the request URI.
    ///
    /// The TTL is clamped to 90 s. Returns the request URI and its actual
    /// expiry.
    pub async fn store(
        &self,
        client_id: &str,
        parameters: Value,
        ttl_ms: u64,
    ) -> (String, UnixMillis) {
        let now = self.clock.now_ms();
        let expires_at = now.saturating_add(ttl_ms.min(MAX_PAR_TTL_MS));
        let request_uri = format!("{REQUEST_URI_PREFIX}{}", generate_token(32));

        let record = ParRequest {
            request_uri: request_uri.clone(),
            client_id: client_id.to_string(),
            parameters,
            expires_at,
            consumed: false,
        };

        let mut shard = self.shards.shard(&request_uri).lock().await;
        shard.insert(request_uri.clone(), record);
        (request_uri, expires_at)
    }

    /// Atomically consumes a pushed request for `client_id`.
    pub async fn consume(
        &self,
        request_uri: &str,
        client_id: &str,
    ) -> Result<ParRequest, StoreError> {
        let now = self.clock.now_ms();
        let mut shard = self.shards.shard(request_uri).lock().await;

        let record = shard.get_mut(request_uri).ok_or(StoreError::NotFound)?;
        if record.consumed {
            return Err(StoreError::AlreadyConsumed { family_id: None });
        }
        if now >= record.expires_at {
            return Err(StoreError::Expired);
        }
        if record.client_id != client_id {
            return Err(StoreError::ClientMismatch);
        }

        record.consumed = true;
        Ok(record.clone())
    }

    /// Drops expired and consumed requests. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.shards
            .for_each(|shard| {
                let before = shard.len();
                shard.retain(|_, r| !r.consumed && now < r.expires_at);
                removed += before - shard.len();
            })
            .await;
        removed
    }
}
