//! `POST /introspect` handler (RFC 7662).

use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use crate::http::{OpState, oauth_error_response};
use crate::oauth::client_auth::{authenticate_client, extract_credentials};

/// Form body of an introspection request.
#[derive(Debug, Deserialize)]
pub struct IntrospectionRequest {
    /// The token to introspect.
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

/// Introspection endpoint. Requires client authentication; unknown,
/// expired, and revoked tokens all answer `{"active": false}`.
pub async fn introspect_handler(
    State(state): State<OpState>,
    headers: HeaderMap,
    Form(request): Form<IntrospectionRequest>,
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
            warn!(client_id = %credentials.client_id, error = %e, "introspection auth failed");
            return oauth_error_response(&e);
        }
    };

    // The hint only orders the lookup; the service tries both shapes.
    let _ = request.token_type_hint;

    let response = state.token_service.introspect(&request.token, &client).await;
    Json(response).into_response()
}
