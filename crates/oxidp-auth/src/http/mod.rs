//! Axum handlers for the protocol endpoints.
//!
//! Paths are stable compatibility points:
//!
//! - `GET /.well-known/openid-configuration`
//! - `GET /.well-known/jwks.json`
//! - `GET /authorize`, `POST /login`, `POST /consent`
//! - `POST /par`
//! - `POST /token`
//! - `POST /revoke`
//! - `POST /introspect`
//! - `POST /device_authorization`, `POST /device/verify`
//! - `POST /bc-authorize`
//! - `POST /admin/setup/token`, `POST /admin/setup/claim`,
//!   `POST /admin/consent/revoke`
//!
//! The server crate assembles these into a router around [`OpState`].

mod authorize;
mod backchannel;
mod device;
mod discovery;
mod introspect;
mod jwks;
mod login;
mod par;
mod revoke;
mod setup;
mod token;

pub use authorize::authorize_handler;
pub use backchannel::backchannel_authorize_handler;
pub use device::{device_authorization_handler, device_verify_handler};
pub use discovery::discovery_handler;
pub use introspect::introspect_handler;
pub use jwks::jwks_handler;
pub use login::{consent_handler, login_handler};
pub use par::par_handler;
pub use revoke::revoke_handler;
pub use setup::{admin_consent_revoke_handler, setup_claim_handler, setup_token_handler};
pub use token::token_handler;

use std::sync::Arc;

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

use oxidp_core::error::ErrorResponse;
use oxidp_core::tenant::Tenant;
use oxidp_store::{
    CibaRequestStore, DeviceCodeStore, ParRequestStore, RateLimiter, SessionStore, SetupTokenStore,
};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::flow::{FlowEngine, LoginService};
use crate::keys::KeyManager;
use crate::oauth::dpop::DpopValidator;
use crate::storage::{ClientStore, ConsentStore};
use crate::token::TokenService;

/// Session cookie carrying the browser session id.
pub const SESSION_COOKIE: &str = "oxidp_session";

/// Everything the protocol handlers need, assembled once at startup.
///
/// Handlers receive this as axum state; there is no ambient configuration.
#[derive(Clone)]
pub struct OpState {
    /// The tenant this listener serves.
    pub tenant: Tenant,

    /// Protocol configuration.
    pub config: AuthConfig,

    /// The `/authorize` engine.
    pub engine: Arc<FlowEngine>,

    /// Credential verification for the login and MFA steps.
    pub login: Arc<LoginService>,

    /// The token endpoint service.
    pub token_service: Arc<TokenService>,

    /// Client registry.
    pub clients: Arc<dyn ClientStore>,

    /// Consent records.
    pub consent: Arc<dyn ConsentStore>,

    /// Browser sessions.
    pub sessions: Arc<SessionStore>,

    /// Pushed authorization requests.
    pub par: Arc<ParRequestStore>,

    /// Device authorization grants.
    pub devices: Arc<DeviceCodeStore>,

    /// Backchannel authentication requests.
    pub ciba: Arc<CibaRequestStore>,

    /// Setup token slot.
    pub setup: Arc<SetupTokenStore>,

    /// Signing keys.
    pub keys: Arc<KeyManager>,

    /// DPoP proof validation.
    pub dpop: Arc<DpopValidator>,

    /// Authentication rate counters.
    pub limiter: Arc<RateLimiter>,

    /// Shared secret protecting the admin surface.
    pub admin_secret: Option<String>,
}

/// Renders an [`AuthError`] as the OAuth JSON error response.
pub(crate) fn oauth_error_response(err: &AuthError) -> Response {
    let code = err.oauth_error_code();
    let status =
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut body = ErrorResponse::with_description(code, err.wire_description());
    let mut headers = HeaderMap::new();
    if let AuthError::RateLimited { retry_after_secs } = err {
        body = body.with_retry_after(*retry_after_secs);
        if let Ok(value) = retry_after_secs.to_string().parse() {
            headers.insert(header::RETRY_AFTER, value);
        }
    }

    (status, headers, Json(body)).into_response()
}
