//! Client registry trait.
//!
//! The protocol engine resolves clients through this seam. Production
//! deployments back it with the relational adapter; tests and single-node
//! setups use the in-memory registry.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::AuthResult;
use crate::error::AuthError;
use crate::types::Client;

/// Storage trait for client registrations.
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Finds a client by its identifier.
    ///
    /// Returns `None` for unknown clients; inactive clients are returned
    /// as-is and rejected by the caller so the distinction can be logged.
    async fn find_by_id(&self, client_id: &str) -> AuthResult<Option<Client>>;
}

/// In-memory client registry.
pub struct MemoryClientStore {
    clients: RwLock<HashMap<String, Client>>,
}

impl MemoryClientStore {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a client, replacing any previous registration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when the registration fails validation.
    pub async fn insert(&self, client: Client) -> AuthResult<()> {
        client
            .validate()
            .map_err(|e| AuthError::invalid_request(e.to_string()))?;
        let mut clients = self.clients.write().await;
        clients.insert(client.client_id.clone(), client);
        Ok(())
    }
}

impl Default for MemoryClientStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientStore for MemoryClientStore {
    async fn find_by_id(&self, client_id: &str) -> AuthResult<Option<Client>> {
        let clients = self.clients.read().await;
        Ok(clients.get(client_id).cloned())
    }
}

/// Storage trait for recorded user consent.
///
/// A consent grant covers a `(user, client)` pair for a set of scopes; the
/// flow engine skips the consent step when every requested scope is already
/// covered, and the admin surface lists and revokes grants.
#[async_trait]
pub trait ConsentStore: Send + Sync {
    /// Returns `true` when every scope in `scope` is covered by a prior
    /// grant for this user and client.
    async fn has_consent(&self, user_id: &str, client_id: &str, scope: &str) -> AuthResult<bool>;

    /// Records consent for the scopes in `scope`, merging with any prior
    /// grant.
    async fn grant(&self, user_id: &str, client_id: &str, scope: &str) -> AuthResult<()>;

    /// Revokes all consent for the pair. Idempotent.
    async fn revoke(&self, user_id: &str, client_id: &str) -> AuthResult<()>;
}

/// In-memory consent store.
#[derive(Default)]
pub struct MemoryConsentStore {
    grants: RwLock<HashMap<(String, String), Vec<String>>>,
}

impl MemoryConsentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsentStore for MemoryConsentStore {
    async fn has_consent(&self, user_id: &str, client_id: &str, scope: &str) -> AuthResult<bool> {
        let grants = self.grants.read().await;
        let Some(granted) = grants.get(&(user_id.to_string(), client_id.to_string())) else {
            return Ok(false);
        };
        Ok(scope
            .split_whitespace()
            .all(|s| granted.iter().any(|g| g == s)))
    }

    async fn grant(&self, user_id: &str, client_id: &str, scope: &str) -> AuthResult<()> {
        let mut grants = self.grants.write().await;
        let entry = grants
            .entry((user_id.to_string(), client_id.to_string()))
            .or_default();
        for s in scope.split_whitespace() {
            if !entry.iter().any(|g| g == s) {
                entry.push(s.to_string());
            }
        }
        Ok(())
    }

    async fn revoke(&self, user_id: &str, client_id: &str) -> AuthResult<()> {
        let mut grants = self.grants.write().await;
        grants.remove(&(user_id.to_string(), client_id.to_string()));
        Ok(())
    }
}
