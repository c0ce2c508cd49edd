//! The `/authorize` state machine.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use oxidp_core::OAuthErrorCode;
use oxidp_core::tenant::Tenant;
use oxidp_core::token::generate_auth_code;
use oxidp_store::{AuthCodeRecord, AuthCodeStore, FlowStage, FlowStateStore, ParRequestStore};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::flow::response::{AuthorizeParams, AuthorizeReply};
use crate::oauth::authorize::{AuthorizationRequest, ResponseMode, ResponseType, ResponseTypeSet};
use crate::oauth::pkce::PkceChallenge;
use crate::storage::{ClientStore, ConsentStore};
use crate::token::mint::{AccessTokenContext, IdTokenContext, TokenMinter};
use crate::types::Client;

/// The user a flow authenticated, with the context the tokens will carry.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Local user identifier.
    pub user_id: String,

    /// Subject claim for minted tokens.
    pub sub: String,

    /// When authentication happened, epoch seconds.
    pub auth_time: u64,

    /// Authentication method references.
    pub amr: Vec<String>,

    /// Authentication context class reference.
    pub acr: Option<String>,
}

/// A request that survived the validation pipeline.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    /// The resolved client.
    pub client: Client,

    /// Owning tenant.
    pub tenant_id: String,

    /// Parsed response type set.
    pub response_types: ResponseTypeSet,

    /// The validated redirect URI.
    pub redirect_uri: String,

    /// Requested scopes (space-separated; may be empty for pure OAuth).
    pub scope: String,

    /// CSRF state, reflected verbatim in the response.
    pub state: Option<String>,

    /// OIDC nonce.
    pub nonce: Option<String>,

    /// Parsed PKCE challenge.
    pub code_challenge: Option<PkceChallenge>,

    /// Negotiated response mode.
    pub response_mode: ResponseMode,

    /// Parsed prompt parameter.
    pub prompt: Option<Prompt>,

    /// DPoP key thumbprint pushed through PAR, when any.
    pub dpop_jkt: Option<String>,
}

/// OIDC prompt values the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Fail rather than interact.
    None,
    /// Force re-authentication.
    Login,
    /// Force the consent step.
    Consent,
}

impl Prompt {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "login" => Some(Self::Login),
            "consent" => Some(Self::Consent),
            _ => None,
        }
    }
}

/// How a failed authorization leaves the server.
#[derive(Debug)]
pub enum AuthorizeRejection {
    /// The redirect URI could not be trusted; render an error page.
    Page {
        /// Wire error code.
        code: OAuthErrorCode,
        /// Human-readable description.
        description: String,
    },

    /// The redirect URI validated; deliver the error to the client.
    Redirect(AuthorizeReply),
}

/// Outcome of driving a request through the engine.
#[derive(Debug)]
pub enum AuthorizeOutcome {
    /// Authorization complete; deliver the response.
    Complete(AuthorizeReply),

    /// The user must authenticate; continue under this flow id.
    LoginRequired {
        /// Flow state carrying the validated request.
        flow_id: String,
    },

    /// The user must grant consent; continue under this flow id.
    ConsentRequired {
        /// Flow state carrying the validated request.
        flow_id: String,
    },
}

/// The `/authorize` flow engine.
pub struct FlowEngine {
    clients: Arc<dyn ClientStore>,
    consent: Arc<dyn ConsentStore>,
    par: Arc<ParRequestStore>,
    codes: Arc<AuthCodeStore>,
    flows: Arc<FlowStateStore>,
    minter: Arc<TokenMinter>,
    config: AuthConfig,
}

impl FlowEngine {
    /// Creates the engine over its collaborators.
    #[must_use]
    pub fn new(
        clients: Arc<dyn ClientStore>,
        consent: Arc<dyn ConsentStore>,
        par: Arc<ParRequestStore>,
        codes: Arc<AuthCodeStore>,
        flows: Arc<FlowStateStore>,
        minter: Arc<TokenMinter>,
        config: AuthConfig,
    ) -> Self {
        Self {
            clients,
            consent,
            par,
            codes,
            flows,
            minter,
            config,
        }
    }

    /// Drives a request through validation, authentication, and consent.
    ///
    /// `user` is the session-authenticated user, when one exists. The
    /// engine decides whether interaction is still required.
    pub async fn authorize(
        &self,
        request: AuthorizationRequest,
        tenant: &Tenant,
        user: Option<AuthenticatedUser>,
    ) -> Result<AuthorizeOutcome, AuthorizeRejection> {
        let validated = self.validate(request, tenant).await?;

        let prompt_none = validated.prompt == Some(Prompt::None);
        let force_login = validated.prompt == Some(Prompt::Login);

        let Some(user) = user.filter(|_| !force_login) else {
            if prompt_none {
                return Err(self.reject(&validated, OAuthErrorCode::LoginRequired, "login required"));
            }
            let flow = self.persist_flow(&validated, FlowStage::Login, None).await;
            debug!(flow_id = %flow, client_id = %validated.client.client_id, "authentication required");
            return Ok(AuthorizeOutcome::LoginRequired { flow_id: flow });
        };

        let consent_needed = validated.prompt == Some(Prompt::Consent)
            || !self
                .consent
                .has_consent(&user.user_id, &validated.client.client_id, &validated.scope)
                .await
                .map_err(|e| self.reject_server(&validated, &e))?;

        if consent_needed {
            if prompt_none {
                return Err(self.reject(
                    &validated,
                    OAuthErrorCode::ConsentRequired,
                    "consent required",
                ));
            }
            let flow = self
                .persist_flow(&validated, FlowStage::Consent, Some(&user))
                .await;
            debug!(flow_id = %flow, client_id = %validated.client.client_id, "consent required");
            return Ok(AuthorizeOutcome::ConsentRequired { flow_id: flow });
        }

        let reply = self.complete(&validated, &user).await?;
        Ok(AuthorizeOutcome::Complete(reply))
    }

    /// Runs the validation pipeline.
    ///
    /// Order: client, PAR consumption (it replaces the request parameters,
    /// so it runs as soon as the client is known), redirect URI, response
    /// type, scope, state, nonce, PKCE. The first two failure classes render
    /// a page; everything after redirect resolution redirects.
    pub async fn validate(
        &self,
        request: AuthorizationRequest,
        tenant: &Tenant,
    ) -> Result<ValidatedRequest, AuthorizeRejection> {
        // 1. Resolve the client.
        let client_id = request.client_id.clone().ok_or_else(|| page(
            OAuthErrorCode::InvalidRequest,
            "missing client_id",
        ))?;
        let client = self
            .clients
            .find_by_id(&client_id)
            .await
            .map_err(|e| page(e.oauth_error_code(), e.wire_description()))?
            .ok_or_else(|| page(OAuthErrorCode::InvalidRequest, "unknown client"))?;
        if !client.active {
            return Err(page(OAuthErrorCode::InvalidRequest, "client is not active"));
        }
        if client.tenant_id != tenant.tenant_id {
            warn!(client_id, tenant_id = %tenant.tenant_id, "client belongs to another tenant");
            return Err(page(OAuthErrorCode::InvalidRequest, "unknown client"));
        }

        // 2. Consume a pushed request, replacing the inline parameters.
        let request = match request.request_uri.as_deref() {
            Some(request_uri) => {
                let stored = self
                    .par
                    .consume(request_uri, &client_id)
                    .await
                    .map_err(|_| page(OAuthErrorCode::InvalidRequest, "invalid request_uri"))?;
                let mut pushed: AuthorizationRequest = serde_json::from_value(stored.parameters)
                    .map_err(|_| {
                        page(OAuthErrorCode::InvalidRequest, "malformed pushed request")
                    })?;
                pushed.client_id = Some(client_id.clone());
                pushed
            }
            None => request,
        };

        // 3. Resolve the redirect URI. Failure here renders a page: the
        // URI is exactly what we cannot trust.
        let requested_redirect = request.redirect_uri.as_deref().ok_or_else(|| page(
            OAuthErrorCode::InvalidRequest,
            "missing redirect_uri",
        ))?;
        let redirect_uri = resolve_redirect_uri(&client, tenant, requested_redirect)
            .ok_or_else(|| page(OAuthErrorCode::InvalidRequest, "redirect_uri is not registered"))?;

        let state = request.state.clone();

        // From here on the redirect is trusted; errors go to the client.
        let reject = |code: OAuthErrorCode, description: &str| {
            redirect_error(&redirect_uri, ResponseMode::Query, code, description, state.as_deref())
        };

        // 4. Response type.
        let response_type = request
            .response_type
            .as_deref()
            .ok_or_else(|| reject(OAuthErrorCode::InvalidRequest, "missing response_type"))?;
        let response_types = ResponseTypeSet::parse(response_type)
            .map_err(|bad| reject(OAuthErrorCode::UnsupportedResponseType, &format!(
                "unsupported response_type: {bad}"
            )))?;
        if !client.is_response_type_allowed(&response_types.canonical()) {
            return Err(reject(
                OAuthErrorCode::UnauthorizedClient,
                "client may not use this response_type",
            ));
        }

        // Negotiate the response mode now so later errors use it too.
        let response_mode = match request.response_mode.as_deref() {
            Some(raw) => {
                let mode = ResponseMode::parse(raw)
                    .ok_or_else(|| reject(OAuthErrorCode::InvalidRequest, "invalid response_mode"))?;
                if !mode.is_allowed_for(&response_types) {
                    return Err(reject(
                        OAuthErrorCode::InvalidRequest,
                        "response_mode query cannot carry tokens",
                    ));
                }
                mode
            }
            None => ResponseMode::default_for(&response_types),
        };
        let reject = |code: OAuthErrorCode, description: &str| {
            redirect_error(&redirect_uri, response_mode, code, description, state.as_deref())
        };

        // 5. Scope.
        let scope = request.scope.clone().unwrap_or_default();
        if !client.is_scope_allowed(&scope) {
            return Err(reject(OAuthErrorCode::InvalidScope, "scope exceeds client registration"));
        }
        let has_openid = scope.split_whitespace().any(|s| s == "openid");
        if response_types.contains(ResponseType::IdToken) && !has_openid {
            return Err(reject(
                OAuthErrorCode::InvalidScope,
                "id_token response requires the openid scope",
            ));
        }

        // 6. State enforcement.
        if tenant.policies.enforce_state && state.is_none() {
            return Err(reject(OAuthErrorCode::InvalidRequest, "state is required"));
        }

        // 7. Nonce: required for any response containing an ID token.
        if response_types.contains(ResponseType::IdToken) && request.nonce.is_none() {
            return Err(reject(
                OAuthErrorCode::InvalidRequest,
                "nonce is required for id_token responses",
            ));
        }

        // 8. PKCE.
        let pkce_required = client.requires_pkce() || tenant.policies.require_pkce;
        let code_challenge = match (&request.code_challenge, pkce_required) {
            (None, true) if response_types.contains(ResponseType::Code) => {
                return Err(reject(
                    OAuthErrorCode::InvalidRequest,
                    "code_challenge is required",
                ));
            }
            (None, _) => None,
            (Some(challenge), _) => {
                let method = request.code_challenge_method.as_deref().unwrap_or("plain");
                let parsed = PkceChallenge::parse(challenge.clone(), method)
                    .map_err(|e| reject(OAuthErrorCode::InvalidRequest, &e.to_string()))?;
                Some(parsed)
            }
        };

        let prompt = match request.prompt.as_deref() {
            Some(raw) => Some(
                Prompt::parse(raw)
                    .ok_or_else(|| reject(OAuthErrorCode::InvalidRequest, "invalid prompt"))?,
            ),
            None => None,
        };

        Ok(ValidatedRequest {
            tenant_id: client.tenant_id.clone(),
            client,
            response_types,
            redirect_uri,
            scope,
            state,
            nonce: request.nonce,
            code_challenge,
            response_mode,
            prompt,
            dpop_jkt: None,
        })
    }

    /// Assembles the success response for an authenticated, consented
    /// request: mints whatever the response type calls for and renders it
    /// through the negotiated response mode.
    pub async fn complete(
        &self,
        validated: &ValidatedRequest,
        user: &AuthenticatedUser,
    ) -> Result<AuthorizeReply, AuthorizeRejection> {
        let mut code = None;
        if validated.response_types.contains(ResponseType::Code) {
            let minted = generate_auth_code();
            self.codes
                .store(
                    &minted,
                    AuthCodeRecord {
                        tenant_id: validated.tenant_id.clone(),
                        client_id: validated.client.client_id.clone(),
                        user_id: user.user_id.clone(),
                        sub: user.sub.clone(),
                        redirect_uri: validated.redirect_uri.clone(),
                        scope: validated.scope.clone(),
                        nonce: validated.nonce.clone(),
                        auth_time: user.auth_time,
                        acr: user.acr.clone(),
                        amr: user.amr.clone(),
                        code_challenge: validated
                            .code_challenge
                            .as_ref()
                            .map(|c| c.as_str().to_string()),
                        dpop_jkt: validated.dpop_jkt.clone(),
                        issued_at: 0,
                        expires_at: 0,
                        consumed: false,
                        family_id: None,
                    },
                    self.config.code_ttl_secs.saturating_mul(1_000),
                )
                .await;
            code = Some(minted);
        }

        let mut access_token = None;
        let mut expires_in = 0;
        if validated.response_types.contains(ResponseType::Token) {
            let minted = self
                .minter
                .mint_access_token(AccessTokenContext {
                    tenant_id: &validated.tenant_id,
                    client_id: &validated.client.client_id,
                    sub: &user.sub,
                    scope: &validated.scope,
                    acr: user.acr.as_deref(),
                    amr: &user.amr,
                    dpop_jkt: validated.dpop_jkt.as_deref(),
                })
                .await
                .map_err(|e| self.reject_server(validated, &e))?;
            expires_in = minted.expires_in;
            access_token = Some(minted.token);
        }

        let mut id_token = None;
        if validated.response_types.contains(ResponseType::IdToken) {
            let minted = self
                .minter
                .mint_id_token(IdTokenContext {
                    tenant_id: &validated.tenant_id,
                    client_id: &validated.client.client_id,
                    sub: &user.sub,
                    auth_time: user.auth_time,
                    nonce: validated.nonce.as_deref(),
                    acr: user.acr.as_deref(),
                    amr: &user.amr,
                    code: code.as_deref(),
                    access_token: access_token.as_deref(),
                })
                .await
                .map_err(|e| self.reject_server(validated, &e))?;
            id_token = Some(minted);
        }

        let mut params = AuthorizeParams::new().with_opt("code", code);
        params = params.with_opt("id_token", id_token);
        if let Some(token) = access_token {
            params = params
                .with("access_token", token)
                .with("token_type", "Bearer")
                .with("expires_in", expires_in.to_string());
        }
        params = params.with_opt("state", validated.state.clone());

        info!(
            client_id = %validated.client.client_id,
            response_type = %validated.response_types,
            "authorization complete"
        );

        params
            .render(&validated.redirect_uri, validated.response_mode)
            .map_err(|_| page(OAuthErrorCode::ServerError, "invalid redirect target"))
    }

    /// The client and scope a parked flow is asking for, for the consent
    /// page. Does not consume the flow.
    pub async fn flow_info(&self, flow_id: &str) -> Result<(String, String), AuthorizeRejection> {
        let flow = self
            .flows
            .get(flow_id)
            .await
            .map_err(|_| page(OAuthErrorCode::InvalidRequest, "unknown or expired flow"))?;
        let scope = flow
            .request
            .get("scope")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok((flow.client_id, scope))
    }

    /// Abandons a parked flow with `access_denied`, delivering the error to
    /// the client when the snapshot's redirect still validates.
    pub async fn deny(
        &self,
        flow_id: &str,
        tenant: &Tenant,
    ) -> Result<AuthorizeReply, AuthorizeRejection> {
        let flow = self
            .flows
            .consume(flow_id)
            .await
            .map_err(|_| page(OAuthErrorCode::InvalidRequest, "unknown or expired flow"))?;
        let request: AuthorizationRequest = serde_json::from_value(flow.request)
            .map_err(|_| page(OAuthErrorCode::ServerError, "corrupt flow state"))?;
        let validated = self.validate(request, tenant).await?;

        match self.reject(&validated, OAuthErrorCode::AccessDenied, "the user denied the request")
        {
            AuthorizeRejection::Redirect(reply) => Ok(reply),
            AuthorizeRejection::Page { code, description } => {
                Err(AuthorizeRejection::Page { code, description })
            }
        }
    }

    /// Reloads the validated request snapshotted under `flow_id`.
    ///
    /// Used by the login and consent steps to resume the flow.
    pub async fn resume(
        &self,
        flow_id: &str,
        tenant: &Tenant,
        user: AuthenticatedUser,
    ) -> Result<AuthorizeOutcome, AuthorizeRejection> {
        let flow = self
            .flows
            .consume(flow_id)
            .await
            .map_err(|_| page(OAuthErrorCode::InvalidRequest, "unknown or expired flow"))?;
        let request: AuthorizationRequest = serde_json::from_value(flow.request)
            .map_err(|_| page(OAuthErrorCode::ServerError, "corrupt flow state"))?;
        self.authorize(request, tenant, Some(user)).await
    }

    async fn persist_flow(
        &self,
        validated: &ValidatedRequest,
        stage: FlowStage,
        user: Option<&AuthenticatedUser>,
    ) -> String {
        let snapshot = json!({
            "response_type": validated.response_types.canonical(),
            "client_id": validated.client.client_id,
            "redirect_uri": validated.redirect_uri,
            "scope": validated.scope,
            "state": validated.state,
            "nonce": validated.nonce,
            "code_challenge": validated.code_challenge.as_ref().map(|c| c.as_str()),
            "code_challenge_method": validated.code_challenge.as_ref().map(|_| "S256"),
            "response_mode": match validated.response_mode {
                ResponseMode::Query => "query",
                ResponseMode::Fragment => "fragment",
                ResponseMode::FormPost => "form_post",
            },
        });

        let flow = self
            .flows
            .create(
                &validated.tenant_id,
                &validated.client.client_id,
                snapshot,
                self.config.code_ttl_secs.saturating_mul(1_000),
            )
            .await;

        if let Some(user) = user {
            let user_id = user.user_id.clone();
            let amr = user.amr.clone();
            let acr = user.acr.clone();
            let auth_time = user.auth_time;
            let _ = self
                .flows
                .update(&flow.flow_id, move |state| {
                    state.stage = stage;
                    state.user_id = Some(user_id);
                    state.amr = amr;
                    state.acr = acr;
                    state.auth_time = Some(auth_time);
                })
                .await;
        } else {
            let _ = self
                .flows
                .update(&flow.flow_id, move |state| {
                    state.stage = stage;
                })
                .await;
        }

        flow.flow_id
    }

    fn reject(
        &self,
        validated: &ValidatedRequest,
        code: OAuthErrorCode,
        description: &str,
    ) -> AuthorizeRejection {
        redirect_error(
            &validated.redirect_uri,
            validated.response_mode,
            code,
            description,
            validated.state.as_deref(),
        )
    }

    fn reject_server(&self, validated: &ValidatedRequest, err: &AuthError) -> AuthorizeRejection {
        warn!(error = %err, "authorization failed server-side");
        redirect_error(
            &validated.redirect_uri,
            validated.response_mode,
            err.oauth_error_code(),
            &err.wire_description(),
            validated.state.as_deref(),
        )
    }
}

fn page(code: OAuthErrorCode, description: impl Into<String>) -> AuthorizeRejection {
    AuthorizeRejection::Page {
        code,
        description: description.into(),
    }
}

fn redirect_error(
    redirect_uri: &str,
    mode: ResponseMode,
    code: OAuthErrorCode,
    description: &str,
    state: Option<&str>,
) -> AuthorizeRejection {
    let params = AuthorizeParams::new()
        .with("error", code.as_str())
        .with("error_description", description)
        .with_opt("state", state.map(String::from));

    match params.render(redirect_uri, mode) {
        Ok(reply) => AuthorizeRejection::Redirect(reply),
        Err(_) => page(code, description),
    }
}

/// Resolves the requested redirect URI against the client registration.
///
/// Strict mode demands an exact match. Otherwise a registered URI matches
/// by scheme/host/port with path prefix; loopback targets are matched
/// ignoring the port for public clients when the tenant allows it.
fn resolve_redirect_uri(client: &Client, tenant: &Tenant, requested: &str) -> Option<String> {
    if client.redirect_uris.iter().any(|r| r == requested) {
        return Some(requested.to_string());
    }

    let requested_url = Url::parse(requested).ok()?;

    if tenant.policies.allow_localhost_redirect
        && client.client_type == crate::types::ClientType::Public
        && is_loopback(&requested_url)
    {
        for registered in &client.redirect_uris {
            if let Ok(registered_url) = Url::parse(registered)
                && is_loopback(&registered_url)
                && registered_url.scheme() == requested_url.scheme()
                && registered_url.path() == requested_url.path()
            {
                return Some(requested.to_string());
            }
        }
    }

    if tenant.policies.strict_redirect {
        return None;
    }

    // Longest-prefix match with identical origin.
    let mut best: Option<&String> = None;
    for registered in &client.redirect_uris {
        let Ok(registered_url) = Url::parse(registered) else {
            continue;
        };
        if registered_url.scheme() == requested_url.scheme()
            && registered_url.host_str() == requested_url.host_str()
            && registered_url.port_or_known_default() == requested_url.port_or_known_default()
            && requested_url.path().starts_with(registered_url.path())
            && best.is_none_or(|b| registered.len() > b.len())
        {
            best = Some(registered);
        }
    }
    best.map(|_| requested.to_string())
}

fn is_loopback(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use oxidp_core::clock::ManualClock;
    use oxidp_core::tenant::TenantPolicies;
    use oxidp_core::token::half_hash;
    use oxidp_store::ConsumeRequest;

    use crate::keys::{KeyManager, SigningAlgorithm};
    use crate::storage::{MemoryClientStore, MemoryConsentStore};
    use crate::types::{ClientAuthMethod, ClientType, GrantType};

    const NOW_MS: u64 = 1_700_000_000_000;

    struct Fixture {
        engine: FlowEngine,
        codes: Arc<AuthCodeStore>,
        par: Arc<ParRequestStore>,
        consent: Arc<MemoryConsentStore>,
        clients: Arc<MemoryClientStore>,
    }

    async fn fixture() -> Fixture {
        let clock = ManualClock::shared(NOW_MS);
        let config = AuthConfig::new("https://op.example");

        let clients = Arc::new(MemoryClientStore::new());
        clients.insert(test_client()).await.unwrap();

        let consent = Arc::new(MemoryConsentStore::new());
        let par = Arc::new(ParRequestStore::new(16, clock.clone()).unwrap());
        let codes = Arc::new(AuthCodeStore::new(16, clock.clone()).unwrap());
        let flows = Arc::new(FlowStateStore::new(16, clock.clone()).unwrap());
        let keys = Arc::new(
            KeyManager::new(8, clock.clone(), vec![SigningAlgorithm::ES256], 72 * 3_600).unwrap(),
        );
        let minter = Arc::new(TokenMinter::new(
            keys,
            clock.clone(),
            config.clone(),
            SigningAlgorithm::ES256,
        ));

        let engine = FlowEngine::new(
            clients.clone() as Arc<dyn ClientStore>,
            consent.clone() as Arc<dyn ConsentStore>,
            par.clone(),
            codes.clone(),
            flows,
            minter,
            config,
        );
        Fixture {
            engine,
            codes,
            par,
            consent,
            clients,
        }
    }

    fn test_client() -> Client {
        Client {
            client_id: "client-1".into(),
            tenant_id: "acme".into(),
            client_type: ClientType::Confidential,
            client_secret_hash: Some("$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$YQ".into()),
            redirect_uris: vec!["https://rp.example/cb".into()],
            allowed_grant_types: vec![GrantType::AuthorizationCode],
            allowed_response_types: vec![
                "code".into(),
                "code id_token".into(),
                "id_token token".into(),
            ],
            allowed_scopes: vec!["openid".into(), "profile".into(), "email".into()],
            token_endpoint_auth_method: ClientAuthMethod::ClientSecretBasic,
            require_pkce: false,
            require_dpop: false,
            jwks: None,
            active: true,
        }
    }

    fn tenant() -> Tenant {
        Tenant {
            tenant_id: "acme".into(),
            base_domain: "auth.acme.example".into(),
            default_partition: "default".into(),
            policies: TenantPolicies::default(),
        }
    }

    fn user() -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: "user-1".into(),
            sub: "user-1".into(),
            auth_time: NOW_MS / 1_000 - 30,
            amr: vec!["pwd".into()],
            acr: None,
        }
    }

    fn hybrid_request() -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: Some("code id_token".into()),
            client_id: Some("client-1".into()),
            redirect_uri: Some("https://rp.example/cb".into()),
            scope: Some("openid profile".into()),
            state: Some("S".into()),
            nonce: Some("N".into()),
            code_challenge: None,
            code_challenge_method: None,
            response_mode: None,
            prompt: None,
            request_uri: None,
        }
    }

    fn decode_unverified(token: &str) -> serde_json::Value {
        let payload = token.split('.').nth(1).unwrap();
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn fragment_params(location: &str) -> std::collections::HashMap<String, String> {
        let fragment = location.split('#').nth(1).unwrap();
        url::form_urlencoded::parse(fragment.as_bytes())
            .into_owned()
            .collect()
    }

    async fn authorize_consented(
        fixture: &Fixture,
        request: AuthorizationRequest,
    ) -> Result<AuthorizeOutcome, AuthorizeRejection> {
        fixture
            .consent
            .grant("user-1", "client-1", "openid profile email")
            .await
            .unwrap();
        fixture
            .engine
            .authorize(request, &tenant(), Some(user()))
            .await
    }

    #[tokio::test]
    async fn test_hybrid_code_id_token_fragment() {
        let fixture = fixture().await;

        let outcome = authorize_consented(&fixture, hybrid_request()).await.unwrap();
        let AuthorizeOutcome::Complete(reply) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };

        let location = reply.location().unwrap().to_string();
        assert!(location.starts_with("https://rp.example/cb#"));
        let params = fragment_params(&location);

        let code = &params["code"];
        assert!(code.len() >= 128);
        assert_eq!(params["state"], "S");

        let id_claims = decode_unverified(&params["id_token"]);
        assert_eq!(id_claims["nonce"], "N");
        assert_eq!(id_claims["c_hash"], half_hash(code));
        assert!(id_claims.get("at_hash").is_none());

        // The minted code is exchangeable.
        let record = fixture
            .codes
            .consume(ConsumeRequest {
                code,
                client_id: "client-1",
                redirect_uri: "https://rp.example/cb",
                code_verifier: None,
                dpop_jkt: None,
            })
            .await
            .unwrap();
        assert_eq!(record.nonce.as_deref(), Some("N"));
    }

    #[tokio::test]
    async fn test_missing_nonce_in_hybrid_redirects_with_error() {
        let fixture = fixture().await;
        let mut request = hybrid_request();
        request.nonce = None;

        let result = authorize_consented(&fixture, request).await;
        let Err(AuthorizeRejection::Redirect(reply)) = result else {
            panic!("expected redirect rejection");
        };
        let location = reply.location().unwrap();
        assert!(location.starts_with("https://rp.example/cb#"));
        let params = fragment_params(location);
        assert_eq!(params["error"], "invalid_request");
        assert!(params["error_description"].contains("nonce"));
        assert_eq!(params["state"], "S");
    }

    #[tokio::test]
    async fn test_implicit_id_token_token_carries_at_hash() {
        let fixture = fixture().await;
        let mut request = hybrid_request();
        request.response_type = Some("id_token token".into());

        let outcome = authorize_consented(&fixture, request).await.unwrap();
        let AuthorizeOutcome::Complete(reply) = outcome else {
            panic!("expected completion");
        };
        let params = fragment_params(reply.location().unwrap());

        let id_claims = decode_unverified(&params["id_token"]);
        assert_eq!(id_claims["at_hash"], half_hash(&params["access_token"]));
        assert!(id_claims.get("c_hash").is_none());
        assert_eq!(params["token_type"], "Bearer");
    }

    #[tokio::test]
    async fn test_untrusted_redirect_renders_page() {
        let fixture = fixture().await;
        let mut request = hybrid_request();
        request.redirect_uri = Some("https://evil.example/cb".into());

        let result = authorize_consented(&fixture, request).await;
        assert!(matches!(result, Err(AuthorizeRejection::Page { .. })));

        let mut request = hybrid_request();
        request.client_id = Some("ghost".into());
        let result = fixture.engine.authorize(request, &tenant(), Some(user())).await;
        assert!(matches!(result, Err(AuthorizeRejection::Page { .. })));
    }

    #[tokio::test]
    async fn test_disallowed_response_type_redirects() {
        let fixture = fixture().await;
        let mut request = hybrid_request();
        request.response_type = Some("token".into());

        let result = authorize_consented(&fixture, request).await;
        let Err(AuthorizeRejection::Redirect(reply)) = result else {
            panic!("expected redirect rejection");
        };
        // Mode defaults to query until the response type is known.
        assert!(reply.location().unwrap().contains("error=unauthorized_client"));
    }

    #[tokio::test]
    async fn test_scope_must_stay_within_registration() {
        let fixture = fixture().await;
        let mut request = hybrid_request();
        request.scope = Some("openid admin".into());

        let result = authorize_consented(&fixture, request).await;
        let Err(AuthorizeRejection::Redirect(reply)) = result else {
            panic!("expected redirect rejection");
        };
        assert!(
            fragment_params(reply.location().unwrap())["error"] == "invalid_scope"
        );
    }

    #[tokio::test]
    async fn test_state_enforcement_policy() {
        let fixture = fixture().await;
        let mut tenant = tenant();
        tenant.policies.enforce_state = true;

        let mut request = hybrid_request();
        request.state = None;
        fixture
            .consent
            .grant("user-1", "client-1", "openid profile")
            .await
            .unwrap();
        let result = fixture.engine.authorize(request, &tenant, Some(user())).await;
        let Err(AuthorizeRejection::Redirect(reply)) = result else {
            panic!("expected redirect rejection");
        };
        let params = fragment_params(reply.location().unwrap());
        assert_eq!(params["error"], "invalid_request");
        assert!(params["error_description"].contains("state"));
    }

    #[tokio::test]
    async fn test_public_client_requires_pkce() {
        let fixture = fixture().await;
        let mut public = test_client();
        public.client_id = "spa".into();
        public.client_type = ClientType::Public;
        public.client_secret_hash = None;
        public.token_endpoint_auth_method = ClientAuthMethod::None;
        fixture.clients.insert(public).await.unwrap();

        let mut request = hybrid_request();
        request.client_id = Some("spa".into());
        request.response_type = Some("code".into());
        fixture
            .consent
            .grant("user-1", "spa", "openid profile")
            .await
            .unwrap();

        let result = fixture.engine.authorize(request.clone(), &tenant(), Some(user())).await;
        let Err(AuthorizeRejection::Redirect(reply)) = result else {
            panic!("expected redirect rejection");
        };
        assert!(reply.location().unwrap().contains("code_challenge"));

        // With a challenge it goes through, and only S256 is accepted.
        request.code_challenge = Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into());
        request.code_challenge_method = Some("S256".into());
        let outcome = fixture
            .engine
            .authorize(request.clone(), &tenant(), Some(user()))
            .await
            .unwrap();
        assert!(matches!(outcome, AuthorizeOutcome::Complete(_)));

        request.code_challenge_method = Some("plain".into());
        let result = fixture.engine.authorize(request, &tenant(), Some(user())).await;
        assert!(matches!(result, Err(AuthorizeRejection::Redirect(_))));
    }

    #[tokio::test]
    async fn test_login_and_consent_interaction() {
        let fixture = fixture().await;

        // No session: login required through a flow.
        let outcome = fixture
            .engine
            .authorize(hybrid_request(), &tenant(), None)
            .await
            .unwrap();
        let AuthorizeOutcome::LoginRequired { flow_id } = outcome else {
            panic!("expected login interaction");
        };

        // Resuming with an authenticated user but no consent: consent step.
        let outcome = fixture
            .engine
            .resume(&flow_id, &tenant(), user())
            .await
            .unwrap();
        let AuthorizeOutcome::ConsentRequired { flow_id } = outcome else {
            panic!("expected consent interaction");
        };

        // Grant consent and resume: complete.
        fixture
            .consent
            .grant("user-1", "client-1", "openid profile")
            .await
            .unwrap();
        let outcome = fixture
            .engine
            .resume(&flow_id, &tenant(), user())
            .await
            .unwrap();
        assert!(matches!(outcome, AuthorizeOutcome::Complete(_)));

        // A consumed flow cannot be replayed.
        let result = fixture.engine.resume(&flow_id, &tenant(), user()).await;
        assert!(matches!(result, Err(AuthorizeRejection::Page { .. })));
    }

    #[tokio::test]
    async fn test_prompt_none_fails_without_interaction() {
        let fixture = fixture().await;
        let mut request = hybrid_request();
        request.prompt = Some("none".into());

        // Unauthenticated.
        let result = fixture
            .engine
            .authorize(request.clone(), &tenant(), None)
            .await;
        let Err(AuthorizeRejection::Redirect(reply)) = result else {
            panic!("expected redirect rejection");
        };
        assert_eq!(fragment_params(reply.location().unwrap())["error"], "login_required");

        // Authenticated but unconsented.
        let result = fixture.engine.authorize(request, &tenant(), Some(user())).await;
        let Err(AuthorizeRejection::Redirect(reply)) = result else {
            panic!("expected redirect rejection");
        };
        assert_eq!(
            fragment_params(reply.location().unwrap())["error"],
            "consent_required"
        );
    }

    #[tokio::test]
    async fn test_par_request_uri_replaces_parameters() {
        let fixture = fixture().await;

        let pushed = serde_json::json!({
            "response_type": "code id_token",
            "redirect_uri": "https://rp.example/cb",
            "scope": "openid",
            "state": "pushed-state",
            "nonce": "pushed-nonce",
        });
        let (request_uri, _) = fixture.par.store("client-1", pushed, 90_000).await;

        let request = AuthorizationRequest {
            response_type: None,
            client_id: Some("client-1".into()),
            redirect_uri: None,
            scope: None,
            state: None,
            nonce: None,
            code_challenge: None,
            code_challenge_method: None,
            response_mode: None,
            prompt: None,
            request_uri: Some(request_uri.clone()),
        };

        fixture
            .consent
            .grant("user-1", "client-1", "openid")
            .await
            .unwrap();
        let outcome = fixture
            .engine
            .authorize(request.clone(), &tenant(), Some(user()))
            .await
            .unwrap();
        let AuthorizeOutcome::Complete(reply) = outcome else {
            panic!("expected completion");
        };
        let params = fragment_params(reply.location().unwrap());
        assert_eq!(params["state"], "pushed-state");

        // The pushed request is single-use.
        let result = fixture.engine.authorize(request, &tenant(), Some(user())).await;
        assert!(matches!(result, Err(AuthorizeRejection::Page { .. })));
    }

    #[tokio::test]
    async fn test_form_post_response_mode() {
        let fixture = fixture().await;
        let mut request = hybrid_request();
        request.response_mode = Some("form_post".into());

        let outcome = authorize_consented(&fixture, request).await.unwrap();
        let AuthorizeOutcome::Complete(AuthorizeReply::FormPost(html)) = outcome else {
            panic!("expected form_post completion");
        };
        assert!(html.contains(r#"action="https://rp.example/cb""#));
        assert!(html.contains(r#"name="state" value="S""#));
    }

    #[tokio::test]
    async fn test_query_mode_rejected_for_token_responses() {
        let fixture = fixture().await;
        let mut request = hybrid_request();
        request.response_mode = Some("query".into());

        let result = authorize_consented(&fixture, request).await;
        let Err(AuthorizeRejection::Redirect(reply)) = result else {
            panic!("expected redirect rejection");
        };
        assert!(reply.location().unwrap().contains("error=invalid_request"));
    }

    #[test]
    fn test_redirect_resolution_rules() {
        let client = test_client();
        let mut tenant = tenant();

        // Strict: exact only.
        assert!(resolve_redirect_uri(&client, &tenant, "https://rp.example/cb").is_some());
        assert!(resolve_redirect_uri(&client, &tenant, "https://rp.example/cb/extra").is_none());

        // Prefix mode.
        tenant.policies.strict_redirect = false;
        assert!(resolve_redirect_uri(&client, &tenant, "https://rp.example/cb/extra").is_some());
        assert!(resolve_redirect_uri(&client, &tenant, "http://rp.example/cb").is_none());
        assert!(resolve_redirect_uri(&client, &tenant, "https://other.example/cb").is_none());

        // Loopback: public clients only, port ignored.
        let mut public = test_client();
        public.client_type = ClientType::Public;
        public.client_secret_hash = None;
        public.redirect_uris = vec!["http://127.0.0.1/cb".into()];
        tenant.policies.allow_localhost_redirect = true;
        assert!(resolve_redirect_uri(&public, &tenant, "http://127.0.0.1:49152/cb").is_some());

        let confidential = test_client();
        assert!(
            resolve_redirect_uri(&confidential, &tenant, "http://127.0.0.1:49152/cb").is_none()
        );
    }
}
