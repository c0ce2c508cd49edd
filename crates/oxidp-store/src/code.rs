//! Authorization code store.
//!
//! Codes are single-use. `consume` is one compare-and-set under the owning
//! shard's lock: it validates presence, expiry, client binding, redirect
//! binding, PKCE, and DPoP binding, and flips `consumed` in the same
//! critical section. Two concurrent consumes of the same code produce
//! exactly one success.
//!
//! Consumed codes are retained until their TTL passes so that a replay can
//! be distinguished from garbage and can trigger revocation of the refresh
//! family minted by the first exchange.

use std::collections::HashMap;
use std::sync::Arc;

use oxidp_core::clock::{Clock, UnixMillis};
use oxidp_core::token::{sha256_b64url, sha256_hex};

use crate::error::StoreError;
use crate::shard::Sharded;

/// A stored authorization code grant.
#[derive(Debug, Clone)]
pub struct AuthCodeRecord {
    /// Owning tenant.
    pub tenant_id: String,

    /// Client the code was issued to.
    pub client_id: String,

    /// Local user identifier.
    pub user_id: String,

    /// Subject claim for minted tokens.
    pub sub: String,

    /// Redirect URI the code was issued for; exchanged against verbatim.
    pub redirect_uri: String,

    /// Granted scopes (space-separated).
    pub scope: String,

    /// OIDC nonce, echoed into the ID token.
    pub nonce: Option<String>,

    /// When the user authenticated, epoch seconds.
    pub auth_time: u64,

    /// Authentication context class reference.
    pub acr: Option<String>,

    /// Authentication method references.
    pub amr: Vec<String>,

    /// PKCE challenge (S256 of the verifier).
    pub code_challenge: Option<String>,

    /// DPoP key thumbprint when the code is DPoP-bound.
    pub dpop_jkt: Option<String>,

    /// Issue time, epoch milliseconds.
    pub issued_at: UnixMillis,

    /// Expiry, epoch milliseconds. At most 600 s after issue.
    pub expires_at: UnixMillis,

    /// Whether the code has been exchanged.
    pub consumed: bool,

    /// Refresh family minted by the successful exchange, recorded so a
    /// replay can revoke it.
    pub family_id: Option<String>,
}

/// What the token endpoint presents when exchanging a code.
#[derive(Debug, Clone)]
pub struct ConsumeRequest<'a> {
    /// The code itself.
    pub code: &'a str,

    /// Authenticated client presenting the code.
    pub client_id: &'a str,

    /// Redirect URI from the token request.
    pub redirect_uri: &'a str,

    /// PKCE verifier, when the code carries a challenge.
    pub code_verifier: Option<&'a str>,

    /// Thumbprint of the DPoP proof key, when one was presented.
    pub dpop_jkt: Option<&'a str>,
}

/// Maximum code lifetime: 600 seconds.
const MAX_CODE_TTL_MS: u64 = 600_000;

/// Sharded authorization code store.
///
/// Codes are keyed by their SHA-256 digest; plaintext codes never sit in
/// memory longer than the call that carries them.
pub struct AuthCodeStore {
    shards: Sharded<HashMap<String, AuthCodeRecord>>,
    clock: Arc<dyn Clock>,
}

impl AuthCodeStore {
    /// Creates the store with `shards` shards (power of two).
    pub fn new(shards: usize, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Self {
            shards: Sharded::new(shards, HashMap::new)?,
            clock,
        })
    }

    /// Stores a freshly minted code. The TTL is clamped to 600 s.
    pub async fn store(&self, code: &str, mut record: AuthCodeRecord, ttl_ms: u64) {
        let now = self.clock.now_ms();
        record.issued_at = now;
        record.expires_at = now.saturating_add(ttl_ms.min(MAX_CODE_TTL_MS));
        record.consumed = false;
        record.family_id = None;

        let digest = sha256_hex(code);
        let mut shard = self.shards.shard(&digest).lock().await;
        shard.insert(digest.clone(), record);
    }

    /// Atomically consumes a code.
    ///
    /// Fails if the code is absent, expired, already consumed, bound to a
    /// different client or redirect URI, or if PKCE / DPoP verification
    /// fails. On success the record is marked consumed and returned.
    ///
    /// A validation failure on a live code leaves it unconsumed; OAuth does
    /// not require burning the code on a bad verifier, and the replay
    /// barrier is the single `consumed` flip under the shard lock.
    pub async fn consume(&self, request: ConsumeRequest<'_>) -> Result<AuthCodeRecord, StoreError> {
        let now = self.clock.now_ms();
        let digest = sha256_hex(request.code);
        let mut shard = self.shards.shard(&digest).lock().await;

        let record = shard.get_mut(&digest).ok_or(StoreError::NotFound)?;

        if record.consumed {
            return Err(StoreError::AlreadyConsumed {
                family_id: record.family_id.clone(),
            });
        }
        if now >= record.expires_at {
            return Err(StoreError::Expired);
        }
        if record.client_id != request.client_id {
            return Err(StoreError::ClientMismatch);
        }
        if record.redirect_uri != request.redirect_uri {
            return Err(StoreError::RedirectMismatch);
        }

        if let Some(challenge) = &record.code_challenge {
            let verifier = request.code_verifier.ok_or(StoreError::PkceMismatch)?;
            if sha256_b64url(verifier) != *challenge {
                return Err(StoreError::PkceMismatch);
            }
        }

        if let Some(bound_jkt) = &record.dpop_jkt {
            match request.dpop_jkt {
                Some(presented) if presented == bound_jkt => {}
                _ => return Err(StoreError::DpopMismatch),
            }
        }

        record.consumed = true;
        Ok(record.clone())
    }

    /// Records the refresh family minted from a consumed code, so a later
    /// replay of the same code can revoke it.
    pub async fn bind_family(&self, code: &str, family_id: &str) {
        let digest = sha256_hex(code);
        let mut shard = self.shards.shard(&digest).lock().await;
        if let Some(record) = shard.get_mut(&digest) {
            record.family_id = Some(family_id.to_string());
        }
    }

    /// Drops expired codes. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.shards
            .for_each(|shard| {
                let before = shard.len();
                shard.retain(|_, r| now < r.expires_at);
                removed += before - shard.len();
            })
            .await;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidp_core::clock::ManualClock;
    use oxidp_core::token::generate_auth_code;

    // RFC 7636 Appendix B test vector.
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn record(challenge: Option<&str>, dpop_jkt: Option<&str>) -> AuthCodeRecord {
        AuthCodeRecord {
            tenant_id: "acme".into(),
            client_id: "client-1".into(),
            user_id: "user-1".into(),
            sub: "user-1".into(),
            redirect_uri: "https://rp.example/cb".into(),
            scope: "openid profile".into(),
            nonce: Some("N".into()),
            auth_time: 1_700_000_000,
            acr: None,
            amr: vec!["pwd".into()],
            code_challenge: challenge.map(String::from),
            dpop_jkt: dpop_jkt.map(String::from),
            issued_at: 0,
            expires_at: 0,
            consumed: false,
            family_id: None,
        }
    }

    fn consume_req<'a>(code: &'a str, verifier: Option<&'a str>) -> ConsumeRequest<'a> {
        ConsumeRequest {
            code,
            client_id: "client-1",
            redirect_uri: "https://rp.example/cb",
            code_verifier: verifier,
            dpop_jkt: None,
        }
    }

    #[tokio::test]
    async fn test_consume_happy_path_with_pkce_vector() {
        let clock = ManualClock::shared(0);
        let store = AuthCodeStore::new(64, clock).unwrap();
        let code = generate_auth_code();

        store.store(&code, record(Some(CHALLENGE), None), 600_000).await;

        let consumed = store.consume(consume_req(&code, Some(VERIFIER))).await.unwrap();
        assert_eq!(consumed.scope, "openid profile");
        assert!(consumed.consumed);
    }

    #[tokio::test]
    async fn test_wrong_verifier_rejected_code_stays_live() {
        let clock = ManualClock::shared(0);
        let store = AuthCodeStore::new(64, clock).unwrap();
        let code = generate_auth_code();
        store.store(&code, record(Some(CHALLENGE), None), 600_000).await;

        let result = store.consume(consume_req(&code, Some("wrong"))).await;
        assert!(matches!(result, Err(StoreError::PkceMismatch)));

        // The right verifier still works afterwards.
        assert!(store.consume(consume_req(&code, Some(VERIFIER))).await.is_ok());
    }

    #[tokio::test]
    async fn test_second_consume_fails_and_reports_family() {
        let clock = ManualClock::shared(0);
        let store = AuthCodeStore::new(64, clock).unwrap();
        let code = generate_auth_code();
        store.store(&code, record(Some(CHALLENGE), None), 600_000).await;

        store.consume(consume_req(&code, Some(VERIFIER))).await.unwrap();
        store.bind_family(&code, "fam-1").await;

        match store.consume(consume_req(&code, Some(VERIFIER))).await {
            Err(StoreError::AlreadyConsumed { family_id }) => {
                assert_eq!(family_id.as_deref(), Some("fam-1"));
            }
            other => panic!("expected AlreadyConsumed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_code_rejected() {
        let clock = ManualClock::shared(0);
        let store = AuthCodeStore::new(64, clock.clone()).unwrap();
        let code = generate_auth_code();
        store.store(&code, record(None, None), 600_000).await;

        clock.advance(600_001);
        assert!(matches!(
            store.consume(consume_req(&code, None)).await,
            Err(StoreError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_ttl_clamped_to_ten_minutes() {
        let clock = ManualClock::shared(0);
        let store = AuthCodeStore::new(64, clock.clone()).unwrap();
        let code = generate_auth_code();
        store.store(&code, record(None, None), 3_600_000).await;

        clock.advance(600_001);
        assert!(matches!(
            store.consume(consume_req(&code, None)).await,
            Err(StoreError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_client_and_redirect_binding() {
        let clock = ManualClock::shared(0);
        let store = AuthCodeStore::new(64, clock).unwrap();
        let code = generate_auth_code();
        store.store(&code, record(None, None), 600_000).await;

        let result = store
            .consume(ConsumeRequest {
                code: &code,
                client_id: "other-client",
                redirect_uri: "https://rp.example/cb",
                code_verifier: None,
                dpop_jkt: None,
            })
            .await;
        assert!(matches!(result, Err(StoreError::ClientMismatch)));

        let result = store
            .consume(ConsumeRequest {
                code: &code,
                client_id: "client-1",
                redirect_uri: "https://rp.example/other",
                code_verifier: None,
                dpop_jkt: None,
            })
            .await;
        assert!(matches!(result, Err(StoreError::RedirectMismatch)));
    }

    #[tokio::test]
    async fn test_dpop_bound_code_requires_matching_thumbprint() {
        let clock = ManualClock::shared(0);
        let store = AuthCodeStore::new(64, clock).unwrap();
        let code = generate_auth_code();
        store.store(&code, record(None, Some("jkt-abc")), 600_000).await;

        let result = store
            .consume(ConsumeRequest {
                code: &code,
                client_id: "client-1",
                redirect_uri: "https://rp.example/cb",
                code_verifier: None,
                dpop_jkt: Some("jkt-other"),
            })
            .await;
        assert!(matches!(result, Err(StoreError::DpopMismatch)));

        let ok = store
            .consume(ConsumeRequest {
                code: &code,
                client_id: "client-1",
                redirect_uri: "https://rp.example/cb",
                code_verifier: None,
                dpop_jkt: Some("jkt-abc"),
            })
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_consume_exactly_one_success() {
        let clock = ManualClock::shared(0);
        let store = Arc::new(AuthCodeStore::new(64, clock).unwrap());
        let code = generate_auth_code();
        store.store(&code, record(None, None), 600_000).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                store
                    .consume(ConsumeRequest {
                        code: &code,
                        client_id: "client-1",
                        redirect_uri: "https://rp.example/cb",
                        code_verifier: None,
                        dpop_jkt: None,
                    })
                    .await
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }
}
