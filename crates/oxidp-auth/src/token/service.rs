//! The token endpoint state machine.
//!
//! Dispatches authenticated token requests by grant type, drives the
//! sharded stores, and mints the response tokens. Client authentication has
//! already happened by the time a request reaches this service.

use std::sync::Arc;

use jsonwebtoken::{Validation, decode, decode_header};
use tracing::{info, warn};

use oxidp_core::clock::Clock;
use oxidp_store::{
    AuthCodeStore, CibaPoll, CibaRequestStore, ConsumeRequest, DeviceCodeStore, DevicePoll,
    RefreshMint, RefreshTokenRotator, RevocationStore, StoreError,
};

use crate::AuthResult;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::keys::KeyManager;
use crate::oauth::dpop::DpopProof;
use crate::oauth::pkce::PkceVerifier;
use crate::oauth::token::{TokenRequest, TokenResponse};
use crate::token::claims::AccessTokenClaims;
use crate::token::introspection::IntrospectionResponse;
use crate::token::mint::{AccessTokenContext, IdTokenContext, TokenMinter};
use crate::types::{Client, GrantType};

/// The token endpoint service.
pub struct TokenService {
    codes: Arc<AuthCodeStore>,
    rotator: Arc<RefreshTokenRotator>,
    revocations: Arc<RevocationStore>,
    devices: Arc<DeviceCodeStore>,
    ciba: Arc<CibaRequestStore>,
    minter: Arc<TokenMinter>,
    keys: Arc<KeyManager>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl TokenService {
    /// Creates the service over its stores.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        codes: Arc<AuthCodeStore>,
        rotator: Arc<RefreshTokenRotator>,
        revocations: Arc<RevocationStore>,
        devices: Arc<DeviceCodeStore>,
        ciba: Arc<CibaRequestStore>,
        minter: Arc<TokenMinter>,
        keys: Arc<KeyManager>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        Self {
            codes,
            rotator,
            revocations,
            devices,
            ciba,
            minter,
            keys,
            clock,
            config,
        }
    }

    /// Handles an authenticated token request.
    pub async fn handle(
        &self,
        request: &TokenRequest,
        client: &Client,
        dpop: Option<&DpopProof>,
    ) -> AuthResult<TokenResponse> {
        let grant_type = GrantType::parse(&request.grant_type)
            .ok_or_else(|| AuthError::unsupported_grant_type(&request.grant_type))?;

        if !client.is_grant_type_allowed(grant_type) {
            return Err(AuthError::unauthorized_client(format!(
                "client may not use grant type {grant_type}"
            )));
        }
        if client.require_dpop && dpop.is_none() {
            return Err(AuthError::invalid_dpop_proof(
                "client registration requires a DPoP proof",
            ));
        }

        match grant_type {
            GrantType::AuthorizationCode => self.exchange_code(request, client, dpop).await,
            GrantType::RefreshToken => self.refresh(request, client, dpop).await,
            GrantType::DeviceCode => self.device(request, client, dpop).await,
            GrantType::Ciba => self.backchannel(request, client, dpop).await,
        }
    }

    /// `authorization_code` grant.
    async fn exchange_code(
        &self,
        request: &TokenRequest,
        client: &Client,
        dpop: Option<&DpopProof>,
    ) -> AuthResult<TokenResponse> {
        let code = request
            .code
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("missing code parameter"))?;
        let redirect_uri = request
            .redirect_uri
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("missing redirect_uri parameter"))?;

        // Shape-check the verifier up front; the store then compares its
        // S256 digest against the stored challenge.
        if let Some(verifier) = request.code_verifier.as_deref() {
            PkceVerifier::new(verifier)
                .map_err(|e| AuthError::invalid_grant(format!("invalid code_verifier: {e}")))?;
        }

        let record = match self
            .codes
            .consume(ConsumeRequest {
                code,
                client_id: &client.client_id,
                redirect_uri,
                code_verifier: request.code_verifier.as_deref(),
                dpop_jkt: dpop.map(|p| p.jkt.as_str()),
            })
            .await
        {
            Ok(record) => record,
            Err(StoreError::AlreadyConsumed { family_id }) => {
                // Replay of a spent code: burn everything the first exchange
                // produced.
                if let Some(family_id) = family_id {
                    warn!(client_id = %client.client_id, "authorization code replay; revoking family");
                    self.rotator.revoke_family(&family_id).await;
                    self.revocations.revoke_refresh_family(&family_id).await;
                }
                return Err(AuthError::invalid_grant("authorization code already used"));
            }
            Err(e) => return Err(e.into()),
        };

        let scope = narrow_scope(request.scope.as_deref(), &record.scope)?;
        let jkt = dpop
            .map(|p| p.jkt.clone())
            .or_else(|| record.dpop_jkt.clone());

        let access = self
            .minter
            .mint_access_token(AccessTokenContext {
                tenant_id: &record.tenant_id,
                client_id: &client.client_id,
                sub: &record.sub,
                scope: &scope,
                acr: record.acr.as_deref(),
                amr: &record.amr,
                dpop_jkt: jkt.as_deref(),
            })
            .await?;

        let mut response = TokenResponse::new(access.token.clone(), access.expires_in, scope.clone());
        if jkt.is_some() {
            response = response.dpop_bound();
        }

        if client.is_grant_type_allowed(GrantType::RefreshToken) {
            let minted = self
                .rotator
                .mint(RefreshMint {
                    client_id: client.client_id.clone(),
                    user_id: record.user_id.clone(),
                    scope: scope.clone(),
                    acr: record.acr.clone(),
                    amr: record.amr.clone(),
                    dpop_jkt: jkt.clone(),
                    auth_time: record.auth_time,
                    ttl_ms: self.config.refresh_token_ttl_secs.saturating_mul(1_000),
                })
                .await;
            self.codes.bind_family(code, &minted.family_id).await;
            response = response.with_refresh_token(minted.new_handle);
        }

        if has_scope(&scope, "openid") {
            let id_token = self
                .minter
                .mint_id_token(IdTokenContext {
                    tenant_id: &record.tenant_id,
                    client_id: &client.client_id,
                    sub: &record.sub,
                    auth_time: record.auth_time,
                    nonce: record.nonce.as_deref(),
                    acr: record.acr.as_deref(),
                    amr: &record.amr,
                    code: None,
                    access_token: Some(&access.token),
                })
                .await?;
            response = response.with_id_token(id_token);
        }

        info!(client_id = %client.client_id, "authorization code exchanged");
        Ok(response)
    }

    /// `refresh_token` grant, with rotation and reuse detection.
    async fn refresh(
        &self,
        request: &TokenRequest,
        client: &Client,
        dpop: Option<&DpopProof>,
    ) -> AuthResult<TokenResponse> {
        let handle = request
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("missing refresh_token parameter"))?;

        let rotation = match self
            .rotator
            .exchange(handle, &client.client_id, dpop.map(|p| p.jkt.as_str()))
            .await
        {
            Ok(rotation) => rotation,
            Err(StoreError::ReuseDetected { family_id }) => {
                warn!(client_id = %client.client_id, "refresh token reuse; family revoked");
                self.revocations.revoke_refresh_family(&family_id).await;
                return Err(AuthError::invalid_grant("refresh token reuse detected"));
            }
            Err(e) => return Err(e.into()),
        };

        let claims = &rotation.claims;
        let scope = narrow_scope(request.scope.as_deref(), &claims.scope)?;

        let access = self
            .minter
            .mint_access_token(AccessTokenContext {
                tenant_id: &client.tenant_id,
                client_id: &client.client_id,
                sub: &claims.user_id,
                scope: &scope,
                acr: claims.acr.as_deref(),
                amr: &claims.amr,
                dpop_jkt: claims.dpop_jkt.as_deref(),
            })
            .await?;

        let mut response = TokenResponse::new(access.token.clone(), access.expires_in, scope.clone())
            .with_refresh_token(rotation.new_handle);
        if claims.dpop_jkt.is_some() {
            response = response.dpop_bound();
        }

        if has_scope(&scope, "openid") {
            let id_token = self
                .minter
                .mint_id_token(IdTokenContext {
                    tenant_id: &client.tenant_id,
                    client_id: &client.client_id,
                    sub: &claims.user_id,
                    auth_time: claims.auth_time,
                    nonce: None,
                    acr: claims.acr.as_deref(),
                    amr: &claims.amr,
                    code: None,
                    access_token: Some(&access.token),
                })
                .await?;
            response = response.with_id_token(id_token);
        }

        Ok(response)
    }

    /// Device authorization grant (RFC 8628).
    async fn device(
        &self,
        request: &TokenRequest,
        client: &Client,
        dpop: Option<&DpopProof>,
    ) -> AuthResult<TokenResponse> {
        let device_code = request
            .device_code
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("missing device_code parameter"))?;

        match self.devices.poll(device_code, &client.client_id).await? {
            DevicePoll::Pending => Err(AuthError::AuthorizationPending),
            DevicePoll::SlowDown => Err(AuthError::SlowDown),
            DevicePoll::Expired => Err(AuthError::ExpiredToken),
            DevicePoll::Denied => Err(AuthError::access_denied("the user denied the request")),
            DevicePoll::Approved(record) => {
                let sub = record
                    .sub
                    .ok_or_else(|| AuthError::internal("approved device grant without subject"))?;
                let user_id = record.user_id.unwrap_or_else(|| sub.clone());
                self.mint_backchannel_response(
                    client,
                    &sub,
                    &user_id,
                    &record.scope,
                    &["device".to_string()],
                    dpop,
                )
                .await
            }
        }
    }

    /// CIBA grant, keyed by `auth_req_id`.
    async fn backchannel(
        &self,
        request: &TokenRequest,
        client: &Client,
        dpop: Option<&DpopProof>,
    ) -> AuthResult<TokenResponse> {
        let auth_req_id = request
            .auth_req_id
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("missing auth_req_id parameter"))?;

        match self.ciba.poll(auth_req_id, &client.client_id).await? {
            CibaPoll::Pending => Err(AuthError::AuthorizationPending),
            CibaPoll::SlowDown => Err(AuthError::SlowDown),
            CibaPoll::Expired => Err(AuthError::ExpiredToken),
            CibaPoll::Denied => Err(AuthError::access_denied("the user denied the request")),
            CibaPoll::Approved(record) => {
                let sub = record
                    .sub
                    .ok_or_else(|| AuthError::internal("approved CIBA request without subject"))?;
                let user_id = record.user_id.unwrap_or_else(|| sub.clone());
                self.mint_backchannel_response(
                    client,
                    &sub,
                    &user_id,
                    &record.scope,
                    &["ciba".to_string()],
                    dpop,
                )
                .await
            }
        }
    }

    async fn mint_backchannel_response(
        &self,
        client: &Client,
        sub: &str,
        user_id: &str,
        scope: &str,
        amr: &[String],
        dpop: Option<&DpopProof>,
    ) -> AuthResult<TokenResponse> {
        let jkt = dpop.map(|p| p.jkt.clone());
        let auth_time = self.clock.now_ms() / 1_000;

        let access = self
            .minter
            .mint_access_token(AccessTokenContext {
                tenant_id: &client.tenant_id,
                client_id: &client.client_id,
                sub,
                scope,
                acr: None,
                amr,
                dpop_jkt: jkt.as_deref(),
            })
            .await?;

        let mut response =
            TokenResponse::new(access.token.clone(), access.expires_in, scope.to_string());
        if jkt.is_some() {
            response = response.dpop_bound();
        }

        if client.is_grant_type_allowed(GrantType::RefreshToken) {
            let minted = self
                .rotator
                .mint(RefreshMint {
                    client_id: client.client_id.clone(),
                    user_id: user_id.to_string(),
                    scope: scope.to_string(),
                    acr: None,
                    amr: amr.to_vec(),
                    dpop_jkt: jkt.clone(),
                    auth_time,
                    ttl_ms: self.config.refresh_token_ttl_secs.saturating_mul(1_000),
                })
                .await;
            response = response.with_refresh_token(minted.new_handle);
        }

        if has_scope(scope, "openid") {
            let id_token = self
                .minter
                .mint_id_token(IdTokenContext {
                    tenant_id: &client.tenant_id,
                    client_id: &client.client_id,
                    sub,
                    auth_time,
                    nonce: None,
                    acr: None,
                    amr,
                    code: None,
                    access_token: Some(&access.token),
                })
                .await?;
            response = response.with_id_token(id_token);
        }

        Ok(response)
    }

    /// Introspects a token for an authenticated client (RFC 7662).
    ///
    /// Unknown, expired, and revoked tokens all answer `{active: false}`.
    pub async fn introspect(&self, token: &str, client: &Client) -> IntrospectionResponse {
        // Opaque refresh handles carry their family id; JWTs do not parse as
        // handles and fall through.
        if RefreshTokenRotator::family_of(token).is_some() {
            return match self.rotator.inspect(token).await {
                Ok(claims) => IntrospectionResponse {
                    active: true,
                    scope: Some(claims.scope),
                    client_id: Some(claims.client_id),
                    sub: Some(claims.user_id),
                    token_type: Some("refresh_token".to_string()),
                    exp: None,
                    iat: None,
                    jti: None,
                    iss: Some(self.minter.issuer().to_string()),
                },
                Err(_) => IntrospectionResponse::inactive(),
            };
        }

        match self.decode_access_token(token, &client.tenant_id).await {
            Some(claims) => {
                if self.revocations.is_jti_revoked(&claims.jti).await {
                    return IntrospectionResponse::inactive();
                }
                IntrospectionResponse {
                    active: true,
                    scope: Some(claims.scope),
                    client_id: Some(claims.client_id),
                    sub: Some(claims.sub),
                    token_type: Some("access_token".to_string()),
                    exp: Some(claims.exp),
                    iat: Some(claims.iat),
                    jti: Some(claims.jti),
                    iss: Some(claims.iss),
                }
            }
            None => IntrospectionResponse::inactive(),
        }
    }

    /// Revokes a token for an authenticated client (RFC 7009).
    ///
    /// Idempotent and always succeeds: unknown tokens and tokens belonging
    /// to other clients are silently ignored.
    pub async fn revoke(&self, token: &str, client: &Client) {
        if let Some(family_id) = RefreshTokenRotator::family_of(token) {
            match self.rotator.inspect(token).await {
                Ok(claims) if claims.client_id == client.client_id => {
                    self.rotator.revoke_family(&family_id).await;
                    self.revocations.revoke_refresh_family(&family_id).await;
                    info!(client_id = %client.client_id, "refresh family revoked");
                }
                _ => {}
            }
            return;
        }

        if let Some(claims) = self
            .decode_access_token_allow_expired(token, &client.tenant_id)
            .await
            && claims.client_id == client.client_id
        {
            let expires_at_ms = (claims.exp.max(0) as u64).saturating_mul(1_000);
            self.revocations
                .revoke_access_jti(&claims.jti, expires_at_ms)
                .await;
            info!(client_id = %client.client_id, "access token revoked");
        }
    }

    async fn decode_access_token(&self, token: &str, tenant_id: &str) -> Option<AccessTokenClaims> {
        let claims = self.decode_access_token_allow_expired(token, tenant_id).await?;
        let now = (self.clock.now_ms() / 1_000) as i64;
        (claims.exp > now).then_some(claims)
    }

    /// Decodes and signature-checks an access token without the expiry
    /// check. Expiry is compared against the service clock by the caller,
    /// not the JWT library's wall clock, so every time decision in the
    /// system reads the same source.
    async fn decode_access_token_allow_expired(
        &self,
        token: &str,
        tenant_id: &str,
    ) -> Option<AccessTokenClaims> {
        let header = decode_header(token).ok()?;
        let kid = header.kid?;
        let key = self.keys.verification_key(tenant_id, &kid).await.ok()??;

        let mut validation = Validation::new(key.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[self.minter.issuer()]);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.remove("exp");

        decode::<AccessTokenClaims>(token, key.decoding_key(), &validation)
            .ok()
            .map(|data| data.claims)
    }
}

/// Scope narrowing: the requested scope must be a subset of the granted
/// scope. Absent means "everything granted".
fn narrow_scope(requested: Option<&str>, granted: &str) -> AuthResult<String> {
    let Some(requested) = requested else {
        return Ok(granted.to_string());
    };
    let granted_set: Vec<&str> = granted.split_whitespace().collect();
    for token in requested.split_whitespace() {
        if !granted_set.contains(&token) {
            return Err(AuthError::invalid_scope(format!(
                "scope {token} exceeds the original grant"
            )));
        }
    }
    Ok(requested.to_string())
}

fn has_scope(scope: &str, wanted: &str) -> bool {
    scope.split_whitespace().any(|s| s == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidp_core::clock::ManualClock;
    use oxidp_core::token::generate_auth_code;
    use oxidp_store::AuthCodeRecord;

    use crate::keys::SigningAlgorithm;
    use crate::types::{ClientAuthMethod, ClientType};

    const NOW_MS: u64 = 1_700_000_000_000;

    struct Fixture {
        service: TokenService,
        codes: Arc<AuthCodeStore>,
        clock: Arc<ManualClock>,
        devices: Arc<DeviceCodeStore>,
        ciba: Arc<CibaRequestStore>,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::shared(NOW_MS);
        let config = AuthConfig::new("https://op.example");

        let codes = Arc::new(AuthCodeStore::new(16, clock.clone()).unwrap());
        let rotator = Arc::new(RefreshTokenRotator::new(16, clock.clone()).unwrap());
        let revocations = Arc::new(RevocationStore::new(16, clock.clone()).unwrap());
        let devices = Arc::new(DeviceCodeStore::new(16, clock.clone()).unwrap());
        let ciba = Arc::new(CibaRequestStore::new(16, clock.clone()).unwrap());
        let keys = Arc::new(
            KeyManager::new(8, clock.clone(), vec![SigningAlgorithm::ES256], 72 * 3_600).unwrap(),
        );
        let minter = Arc::new(TokenMinter::new(
            keys.clone(),
            clock.clone(),
            config.clone(),
            SigningAlgorithm::ES256,
        ));

        let service = TokenService::new(
            codes.clone(),
            rotator,
            revocations,
            devices.clone(),
            ciba.clone(),
            minter,
            keys,
            clock.clone(),
            config,
        );
        Fixture {
            service,
            codes,
            clock,
            devices,
            ciba,
        }
    }

    fn client() -> Client {
        Client {
            client_id: "client-1".into(),
            tenant_id: "acme".into(),
            client_type: ClientType::Public,
            client_secret_hash: None,
            redirect_uris: vec!["https://rp.example/cb".into()],
            allowed_grant_types: vec![
                GrantType::AuthorizationCode,
                GrantType::RefreshToken,
                GrantType::DeviceCode,
                GrantType::Ciba,
            ],
            allowed_response_types: vec!["code".into()],
            allowed_scopes: vec![],
            token_endpoint_auth_method: ClientAuthMethod::None,
            require_pkce: false,
            require_dpop: false,
            jwks: None,
            active: true,
        }
    }

    fn seed_record(scope: &str) -> AuthCodeRecord {
        AuthCodeRecord {
            tenant_id: "acme".into(),
            client_id: "client-1".into(),
            user_id: "user-1".into(),
            sub: "user-1".into(),
            redirect_uri: "https://rp.example/cb".into(),
            scope: scope.into(),
            nonce: Some("N".into()),
            auth_time: NOW_MS / 1_000 - 60,
            acr: None,
            amr: vec!["pwd".into()],
            code_challenge: None,
            dpop_jkt: None,
            issued_at: 0,
            expires_at: 0,
            consumed: false,
            family_id: None,
        }
    }

    async fn seed_code(fixture: &Fixture, scope: &str) -> String {
        let code = generate_auth_code();
        fixture.codes.store(&code, seed_record(scope), 600_000).await;
        code
    }

    fn code_request(code: &str) -> TokenRequest {
        TokenRequest {
            grant_type: "authorization_code".into(),
            code: Some(code.to_string()),
            redirect_uri: Some("https://rp.example/cb".into()),
            code_verifier: None,
            client_id: Some("client-1".into()),
            client_secret: None,
            refresh_token: None,
            scope: None,
            device_code: None,
            auth_req_id: None,
        }
    }

    fn refresh_request(handle: &str) -> TokenRequest {
        TokenRequest {
            grant_type: "refresh_token".into(),
            code: None,
            redirect_uri: None,
            code_verifier: None,
            client_id: Some("client-1".into()),
            client_secret: None,
            refresh_token: Some(handle.to_string()),
            scope: None,
            device_code: None,
            auth_req_id: None,
        }
    }

    #[tokio::test]
    async fn test_code_exchange_mints_full_response() {
        let fixture = fixture();
        let code = seed_code(&fixture, "openid profile").await;

        let response = fixture
            .service
            .handle(&code_request(&code), &client(), None)
            .await
            .unwrap();

        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.scope, "openid profile");
        assert!(response.refresh_token.is_some());
        assert!(response.id_token.is_some());
    }

    #[tokio::test]
    async fn test_code_replay_revokes_derived_family() {
        let fixture = fixture();
        let code = seed_code(&fixture, "openid").await;
        let client = client();

        let first = fixture
            .service
            .handle(&code_request(&code), &client, None)
            .await
            .unwrap();
        let handle = first.refresh_token.unwrap();

        // Replay the code.
        let replay = fixture.service.handle(&code_request(&code), &client, None).await;
        assert!(matches!(replay, Err(AuthError::InvalidGrant { .. })));

        // The refresh family from the first exchange is dead.
        let refresh = fixture
            .service
            .handle(&refresh_request(&handle), &client, None)
            .await;
        assert!(matches!(refresh, Err(AuthError::InvalidGrant { .. })));
    }

    #[tokio::test]
    async fn test_refresh_rotation_and_reuse() {
        let fixture = fixture();
        let code = seed_code(&fixture, "openid offline_access").await;
        let client = client();

        let initial = fixture
            .service
            .handle(&code_request(&code), &client, None)
            .await
            .unwrap();
        let r1 = initial.refresh_token.unwrap();

        let rotated = fixture
            .service
            .handle(&refresh_request(&r1), &client, None)
            .await
            .unwrap();
        let r2 = rotated.refresh_token.clone().unwrap();
        assert_ne!(r1, r2);
        assert!(rotated.id_token.is_some());

        // R1 again: reuse, invalid_grant.
        let reuse = fixture
            .service
            .handle(&refresh_request(&r1), &client, None)
            .await;
        assert!(matches!(reuse, Err(AuthError::InvalidGrant { .. })));

        // R2 is dead with the family.
        let tip = fixture
            .service
            .handle(&refresh_request(&r2), &client, None)
            .await;
        assert!(matches!(tip, Err(AuthError::InvalidGrant { .. })));
    }

    #[tokio::test]
    async fn test_pkce_bound_exchange() {
        let fixture = fixture();
        let client = client();

        // RFC 7636 Appendix B pair.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

        let code = generate_auth_code();
        fixture
            .codes
            .store(
                &code,
                AuthCodeRecord {
                    code_challenge: Some(challenge.into()),
                    ..seed_record("openid")
                },
                600_000,
            )
            .await;

        let mut request = code_request(&code);
        request.code_verifier = Some("wrong".into());
        assert!(matches!(
            fixture.service.handle(&request, &client, None).await,
            Err(AuthError::InvalidGrant { .. })
        ));

        request.code_verifier = Some(verifier.into());
        assert!(fixture.service.handle(&request, &client, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_scope_narrowing_and_expansion() {
        let fixture = fixture();
        let client = client();

        let code = seed_code(&fixture, "openid profile email").await;
        let mut narrowed = code_request(&code);
        narrowed.scope = Some("openid profile".into());
        let response = fixture.service.handle(&narrowed, &client, None).await.unwrap();
        assert_eq!(response.scope, "openid profile");

        let code = seed_code(&fixture, "openid").await;
        let mut expanded = code_request(&code);
        expanded.scope = Some("openid admin".into());
        let result = fixture.service.handle(&expanded, &client, None).await;
        assert!(matches!(result, Err(AuthError::InvalidScope { .. })));
    }

    #[tokio::test]
    async fn test_unsupported_and_unauthorized_grants() {
        let fixture = fixture();

        let mut request = code_request("whatever");
        request.grant_type = "password".into();
        assert!(matches!(
            fixture.service.handle(&request, &client(), None).await,
            Err(AuthError::UnsupportedGrantType { .. })
        ));

        let mut restricted = client();
        restricted.allowed_grant_types = vec![GrantType::AuthorizationCode];
        let request = refresh_request("some-handle");
        assert!(matches!(
            fixture.service.handle(&request, &restricted, None).await,
            Err(AuthError::UnauthorizedClient { .. })
        ));
    }

    #[tokio::test]
    async fn test_device_grant_states() {
        let fixture = fixture();
        let client = client();

        let auth = fixture
            .devices
            .issue("client-1", "openid", 600_000, 5_000)
            .await;

        let mut request = TokenRequest {
            grant_type: "urn:ietf:params:oauth:grant-type:device_code".into(),
            code: None,
            redirect_uri: None,
            code_verifier: None,
            client_id: Some("client-1".into()),
            client_secret: None,
            refresh_token: None,
            scope: None,
            device_code: Some(auth.device_code.clone()),
            auth_req_id: None,
        };

        // Immediately: inside the interval.
        fixture.clock.advance(2_000);
        assert!(matches!(
            fixture.service.handle(&request, &client, None).await,
            Err(AuthError::SlowDown)
        ));

        fixture.clock.advance(4_000);
        assert!(matches!(
            fixture.service.handle(&request, &client, None).await,
            Err(AuthError::AuthorizationPending)
        ));

        fixture
            .devices
            .approve_by_user_code(&auth.user_code, "user-1", "user-1")
            .await
            .unwrap();
        fixture.clock.advance(6_000);
        let response = fixture.service.handle(&request, &client, None).await.unwrap();
        assert!(response.id_token.is_some());

        // Consumed.
        fixture.clock.advance(6_000);
        assert!(matches!(
            fixture.service.handle(&request, &client, None).await,
            Err(AuthError::InvalidGrant { .. })
        ));

        // Expired regardless of status.
        let expired = fixture
            .devices
            .issue("client-1", "openid", 1_000, 5_000)
            .await;
        request.device_code = Some(expired.device_code);
        fixture.clock.advance(600_000);
        assert!(matches!(
            fixture.service.handle(&request, &client, None).await,
            Err(AuthError::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_ciba_grant() {
        let fixture = fixture();
        let client = client();

        let req = fixture
            .ciba
            .issue("client-1", "openid", Some("user@example.com"), None, 300_000, 5_000)
            .await;

        let request = TokenRequest {
            grant_type: "urn:openid:params:grant-type:ciba".into(),
            code: None,
            redirect_uri: None,
            code_verifier: None,
            client_id: Some("client-1".into()),
            client_secret: None,
            refresh_token: None,
            scope: None,
            device_code: None,
            auth_req_id: Some(req.auth_req_id.clone()),
        };

        fixture.clock.advance(6_000);
        assert!(matches!(
            fixture.service.handle(&request, &client, None).await,
            Err(AuthError::AuthorizationPending)
        ));

        fixture
            .ciba
            .resolve(&req.auth_req_id, true, Some("user-1"), Some("user-1"))
            .await
            .unwrap();
        fixture.clock.advance(6_000);
        let response = fixture.service.handle(&request, &client, None).await.unwrap();
        assert_eq!(response.scope, "openid");
    }

    #[tokio::test]
    async fn test_introspection_lifecycle() {
        let fixture = fixture();
        let client = client();
        let code = seed_code(&fixture, "openid").await;

        let response = fixture
            .service
            .handle(&code_request(&code), &client, None)
            .await
            .unwrap();

        // Active access token.
        let introspected = fixture.service.introspect(&response.access_token, &client).await;
        assert!(introspected.active);
        assert_eq!(introspected.sub.as_deref(), Some("user-1"));
        assert_eq!(introspected.token_type.as_deref(), Some("access_token"));

        // Active refresh handle.
        let handle = response.refresh_token.clone().unwrap();
        let introspected = fixture.service.introspect(&handle, &client).await;
        assert!(introspected.active);
        assert_eq!(introspected.token_type.as_deref(), Some("refresh_token"));

        // Revoked access token reads inactive.
        fixture.service.revoke(&response.access_token, &client).await;
        let introspected = fixture.service.introspect(&response.access_token, &client).await;
        assert!(!introspected.active);

        // Garbage reads inactive.
        let introspected = fixture.service.introspect("garbage", &client).await;
        assert!(!introspected.active);

        // Expired access token reads inactive.
        let code = seed_code(&fixture, "openid").await;
        let response = fixture
            .service
            .handle(&code_request(&code), &client, None)
            .await
            .unwrap();
        fixture.clock.advance(3_600_000 + 1_000);
        let introspected = fixture.service.introspect(&response.access_token, &client).await;
        assert!(!introspected.active);
    }

    #[tokio::test]
    async fn test_revocation_is_idempotent_and_silent() {
        let fixture = fixture();
        let client = client();
        let code = seed_code(&fixture, "openid").await;
        let response = fixture
            .service
            .handle(&code_request(&code), &client, None)
            .await
            .unwrap();

        let handle = response.refresh_token.clone().unwrap();
        fixture.service.revoke(&handle, &client).await;
        fixture.service.revoke(&handle, &client).await;
        fixture.service.revoke("unknown-token", &client).await;

        let refresh = fixture
            .service
            .handle(&refresh_request(&handle), &client, None)
            .await;
        assert!(matches!(refresh, Err(AuthError::InvalidGrant { .. })));

        // A token owned by another client is left alone.
        let code = seed_code(&fixture, "openid").await;
        let response = fixture
            .service
            .handle(&code_request(&code), &client, None)
            .await
            .unwrap();
        let mut other = client.clone();
        other.client_id = "other-client".into();
        fixture.service.revoke(&response.access_token, &other).await;
        let introspected = fixture.service.introspect(&response.access_token, &client).await;
        assert!(introspected.active);
    }

    #[test]
    fn test_narrow_scope() {
        assert_eq!(narrow_scope(None, "a b").unwrap(), "a b");
        assert_eq!(narrow_scope(Some("a"), "a b").unwrap(), "a");
        assert!(narrow_scope(Some("a c"), "a b").is_err());
    }
}
