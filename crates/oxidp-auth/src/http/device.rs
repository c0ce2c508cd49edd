//! Device flow handlers (RFC 8628): `POST /device_authorization` starts a
//! flow; `POST /device/verify` is what the verification page posts after
//! the signed-in user types the user code.

use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::AuthError;
use crate::http::{OpState, SESSION_COOKIE, oauth_error_response};
use crate::oauth::client_auth::{authenticate_client, extract_credentials};
use crate::types::GrantType;

/// Form body of a device authorization request.
#[derive(Debug, Deserialize)]
pub struct DeviceAuthorizationRequest {
    /// Client identifier (public clients).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (confidential clients).
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Requested scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Device authorization endpoint: starts a device flow and hands back the
/// user code to display.
pub async fn device_authorization_handler(
    State(state): State<OpState>,
    headers: HeaderMap,
    Form(request): Form<DeviceAuthorizationRequest>,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let credentials = match extract_credentials(
        authorization,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    ) {
        Ok(credentials) => credentials,
        Err(e) => return oauth_error_response(&e),
    };

    let client = match authenticate_client(&state.clients, &credentials).await {
        Ok(client) => client,
        Err(e) => {
            warn!(client_id = %credentials.client_id, error = %e, "device authorization auth failed");
            return oauth_error_response(&e);
        }
    };

    if !client.is_grant_type_allowed(GrantType::DeviceCode) {
        return oauth_error_response(&AuthError::unauthorized_client(
            "client may not use the device authorization grant",
        ));
    }

    let scope = request.scope.unwrap_or_default();
    if !client.is_scope_allowed(&scope) {
        return oauth_error_response(&AuthError::invalid_scope(
            "scope exceeds client registration",
        ));
    }

    let authorization = state
        .devices
        .issue(
            &client.client_id,
            &scope,
            state.config.device_code_ttl_secs.saturating_mul(1_000),
            state.config.poll_interval_secs.saturating_mul(1_000),
        )
        .await;

    info!(client_id = %client.client_id, user_code = %authorization.user_code, "device flow started");

    let issuer = state.config.issuer.trim_end_matches('/');
    Json(json!({
        "device_code": authorization.device_code,
        "user_code": authorization.user_code,
        "verification_uri": format!("{issuer}/device"),
        "verification_uri_complete": format!("{issuer}/device?user_code={}", authorization.user_code),
        "expires_in": state.config.device_code_ttl_secs,
        "interval": authorization.interval_secs,
    }))
    .into_response()
}

/// Form body of a device verification decision.
#[derive(Debug, Deserialize)]
pub struct DeviceVerification {
    /// The user code shown on the device.
    pub user_code: String,

    /// Whether the user approved.
    pub approve: bool,
}

/// Device verification: the signed-in user approves or denies the grant
/// identified by its user code.
pub async fn device_verify_handler(
    State(state): State<OpState>,
    jar: CookieJar,
    Form(verification): Form<DeviceVerification>,
) -> Response {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let session = match state.sessions.get(cookie.value()).await {
        Ok(session) => session,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let result = if verification.approve {
        state
            .devices
            .approve_by_user_code(&verification.user_code, &session.user_id, &session.user_id)
            .await
    } else {
        state.devices.deny_by_user_code(&verification.user_code).await
    };

    match result {
        Ok(()) => {
            info!(user_code = %verification.user_code, approved = verification.approve, "device grant resolved");
            Json(json!({"resolved": true})).into_response()
        }
        Err(e) => {
            warn!(user_code = %verification.user_code, error = %e, "device verification failed");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_user_code"})),
            )
                .into_response()
        }
    }
}
