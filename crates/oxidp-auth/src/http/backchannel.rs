//! `POST /bc-authorize` handler (CIBA initiation).

use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::AuthError;
use crate::http::{OpState, oauth_error_response};
use crate::oauth::client_auth::{authenticate_client, extract_credentials};
use crate::types::GrantType;

/// Form body of a backchannel authentication request.
#[derive(Debug, Deserialize)]
pub struct BackchannelRequest {
    /// Client identifier.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret.
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Requested scopes.
    #[serde(default)]
    pub scope: Option<String>,

    /// Hint identifying the user to authenticate.
    #[serde(default)]
    pub login_hint: Option<String>,

    /// Message to show on the authentication device.
    #[serde(default)]
    pub binding_message: Option<String>,
}

/// Backchannel authentication endpoint: starts a CIBA request the client
/// then polls at the token endpoint with `auth_req_id`.
pub async fn backchannel_authorize_handler(
    State(state): State<OpState>,
    headers: HeaderMap,
    Form(request): Form<BackchannelRequest>,
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
            warn!(client_id = %credentials.client_id, error = %e, "backchannel auth failed");
            return oauth_error_response(&e);
        }
    };

    if !client.is_grant_type_allowed(GrantType::Ciba) {
        return oauth_error_response(&AuthError::unauthorized_client(
            "client may not use the CIBA grant",
        ));
    }
    if request.login_hint.as_deref().is_none_or(str::is_empty) {
        return oauth_error_response(&AuthError::invalid_request("login_hint is required"));
    }

    let scope = request.scope.unwrap_or_default();
    if !client.is_scope_allowed(&scope) {
        return oauth_error_response(&AuthError::invalid_scope(
            "scope exceeds client registration",
        ));
    }

    let ciba_request = state
        .ciba
        .issue(
            &client.client_id,
            &scope,
            request.login_hint.as_deref(),
            request.binding_message.as_deref(),
            state.config.device_code_ttl_secs.saturating_mul(1_000),
            state.config.poll_interval_secs.saturating_mul(1_000),
        )
        .await;

    info!(client_id = %client.client_id, "backchannel authentication started");

    Json(json!({
        "auth_req_id": ciba_request.auth_req_id,
        "expires_in": state.config.device_code_ttl_secs,
        "interval": state.config.poll_interval_secs,
    }))
    .into_response()
}
