//! `POST /revoke` handler (RFC 7009).

use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::warn;

use crate::http::{OpState, oauth_error_response};
use crate::oauth::client_auth::{authenticate_client, extract_credentials};

/// Form body of a revocation request.
#[derive(Debug, Deserialize)]
pub struct RevocationRequest {
    /// The token to revoke.
    pub token: String,

    /// Optional hint: `access_token` or `refresh_token`.
    #[serde(default)]
    pub token_type_hint: Option<String>,

    /// Client ID (client_secret_post).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (client_secret_post).
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Revocation endpoint.
///
/// Always answers 200 once the client authenticates, whether or not the
/// token existed - revocation leaks nothing about token validity.
pub async fn revoke_handler(
    State(state): State<OpState>,
    headers: HeaderMap,
    Form(request): Form<RevocationRequest>,
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
            warn!(client_id = %credentials.client_id, error = %e, "revocation auth failed");
            return oauth_error_response(&e);
        }
    };

    let _ = request.token_type_hint;
    state.token_service.revoke(&request.token, &client).await;

    StatusCode::OK.into_response()
}
