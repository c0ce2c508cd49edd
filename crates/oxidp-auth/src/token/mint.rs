//! Token minting.
//!
//! Access tokens are JWTs with a random 128-bit `jti`. ID tokens carry
//! `c_hash` iff a code rides in the same response and `at_hash` iff an
//! access token does, whichever channel issues them. The hash construction
//! is the left half of the digest matching the signing algorithm's hash -
//! SHA-256 for every algorithm this server signs with.

use std::sync::Arc;

use oxidp_core::clock::Clock;
use oxidp_core::token::half_hash;
use uuid::Uuid;

use crate::AuthResult;
use crate::config::AuthConfig;
use crate::keys::{KeyManager, SigningAlgorithm};
use crate::token::claims::{AccessTokenClaims, Confirmation, IdTokenClaims};

/// Inputs for minting an access token.
#[derive(Debug, Clone)]
pub struct AccessTokenContext<'a> {
    /// Tenant whose key signs the token.
    pub tenant_id: &'a str,

    /// Client the token is issued to.
    pub client_id: &'a str,

    /// Subject.
    pub sub: &'a str,

    /// Granted scopes.
    pub scope: &'a str,

    /// Authentication context class reference.
    pub acr: Option<&'a str>,

    /// Authentication method references.
    pub amr: &'a [String],

    /// DPoP key thumbprint for sender-constrained tokens.
    pub dpop_jkt: Option<&'a str>,
}

/// Inputs for minting an ID token.
#[derive(Debug, Clone)]
pub struct IdTokenContext<'a> {
    /// Tenant whose key signs the token.
    pub tenant_id: &'a str,

    /// Audience: the client id.
    pub client_id: &'a str,

    /// Subject.
    pub sub: &'a str,

    /// When the user authenticated, epoch seconds.
    pub auth_time: u64,

    /// Nonce from the authorization request.
    pub nonce: Option<&'a str>,

    /// Authentication context class reference.
    pub acr: Option<&'a str>,

    /// Authentication method references.
    pub amr: &'a [String],

    /// The code issued in the same response, when any.
    pub code: Option<&'a str>,

    /// The access token issued in the same response, when any.
    pub access_token: Option<&'a str>,
}

/// A minted access token with its bookkeeping.
#[derive(Debug, Clone)]
pub struct MintedAccessToken {
    /// The compact JWS.
    pub token: String,

    /// Token identifier, for revocation.
    pub jti: String,

    /// Lifetime in seconds.
    pub expires_in: u64,

    /// Absolute expiry, epoch milliseconds.
    pub expires_at_ms: u64,
}

/// Mints access and ID tokens with the tenant's active signing key.
pub struct TokenMinter {
    keys: Arc<KeyManager>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    algorithm: SigningAlgorithm,
}

impl TokenMinter {
    /// Creates a minter signing with `algorithm`.
    #[must_use]
    pub fn new(
        keys: Arc<KeyManager>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
        algorithm: SigningAlgorithm,
    ) -> Self {
        Self {
            keys,
            clock,
            config,
            algorithm,
        }
    }

    /// The issuer carried in every minted token.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// The signing algorithm in use.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Mints an access token.
    pub async fn mint_access_token(
        &self,
        ctx: AccessTokenContext<'_>,
    ) -> AuthResult<MintedAccessToken> {
        let now_ms = self.clock.now_ms();
        let now = (now_ms / 1_000) as i64;
        let expires_in = self.config.access_token_ttl_secs;
        let jti = Uuid::new_v4().to_string();

        let claims = AccessTokenClaims {
            iss: self.config.issuer.clone(),
            sub: ctx.sub.to_string(),
            aud: self.config.issuer.clone(),
            exp: now + expires_in as i64,
            iat: now,
            jti: jti.clone(),
            scope: ctx.scope.to_string(),
            client_id: ctx.client_id.to_string(),
            amr: ctx.amr.to_vec(),
            acr: ctx.acr.map(String::from),
            cnf: ctx.dpop_jkt.map(|jkt| Confirmation {
                jkt: jkt.to_string(),
            }),
        };

        let token = self.keys.sign(ctx.tenant_id, self.algorithm, &claims).await?;
        Ok(MintedAccessToken {
            token,
            jti,
            expires_in,
            expires_at_ms: now_ms.saturating_add(expires_in.saturating_mul(1_000)),
        })
    }

    /// Mints an ID token, attaching `c_hash` / `at_hash` for whatever
    /// artifacts share the response.
    pub async fn mint_id_token(&self, ctx: IdTokenContext<'_>) -> AuthResult<String> {
        let now = (self.clock.now_ms() / 1_000) as i64;

        let claims = IdTokenClaims {
            iss: self.config.issuer.clone(),
            sub: ctx.sub.to_string(),
            aud: ctx.client_id.to_string(),
            exp: now + self.config.id_token_ttl_secs as i64,
            iat: now,
            auth_time: ctx.auth_time,
            nonce: ctx.nonce.map(String::from),
            acr: ctx.acr.map(String::from),
            amr: ctx.amr.to_vec(),
            at_hash: ctx.access_token.map(half_hash),
            c_hash: ctx.code.map(half_hash),
        };

        self.keys.sign(ctx.tenant_id, self.algorithm, &claims).await
    }
}
