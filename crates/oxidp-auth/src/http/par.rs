//! `POST /par` handler (RFC 9126).

use std::collections::HashMap;

use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, warn};

use oxidp_store::MAX_PAR_TTL_MS;

use crate::error::AuthError;
use crate::http::{OpState, oauth_error_response};
use crate::oauth::client_auth::{authenticate_client, extract_credentials};

/// Pushed Authorization Request endpoint.
///
/// Authenticates the client, stores the pushed parameters, and returns the
/// `request_uri` the client presents at `/authorize`. A pushed request may
/// not itself contain `request_uri`.
pub async fn par_handler(
    State(state): State<OpState>,
    headers: HeaderMap,
    Form(mut params): Form<HashMap<String, String>>,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let credentials = match extract_credentials(
        authorization,
        params.get("client_id").map(String::as_str),
        params.get("client_secret").map(String::as_str),
    ) {
        Ok(credentials) => credentials,
        Err(e) => return oauth_error_response(&e),
    };

    let client = match authenticate_client(&state.clients, &credentials).await {
        Ok(client) => client,
        Err(e) => {
            warn!(client_id = %credentials.client_id, error = %e, "PAR client authentication failed");
            return oauth_error_response(&e);
        }
    };

    if params.contains_key("request_uri") {
        return oauth_error_response(&AuthError::invalid_request(
            "request_uri may not be pushed",
        ));
    }
    params.remove("client_secret");

    let parameters = json!(params);
    let (request_uri, _expires_at) = state
        .par
        .store(&client.client_id, parameters, MAX_PAR_TTL_MS)
        .await;

    debug!(client_id = %client.client_id, "stored pushed authorization request");

    (
        StatusCode::CREATED,
        Json(json!({
            "request_uri": request_uri,
            "expires_in": MAX_PAR_TTL_MS / 1_000,
        })),
    )
        .into_response()
}
