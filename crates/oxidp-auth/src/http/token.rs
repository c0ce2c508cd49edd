//! `POST /token` handler.

use axum::Form;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::http::{OpState, oauth_error_response};
use crate::oauth::client_auth::{authenticate_client, extract_credentials};
use crate::oauth::token::TokenRequest;

/// Requests per client per minute before the brute-force counter trips.
const CLIENT_RATE_LIMIT: u64 = 120;

/// Token endpoint: dispatches authenticated requests by grant type.
///
/// Clients authenticate per their registered method; a `DPoP` header, when
/// present, is validated before the grant runs so every minted token can be
/// key-bound.
pub async fn token_handler(
    State(state): State<OpState>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Response {
    debug!(grant_type = %request.grant_type, "token request");

    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let credentials = match extract_credentials(
        authorization,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    ) {
        Ok(credentials) => credentials,
        Err(e) => return oauth_error_response(&e),
    };

    // Brute-force counter keyed by presented client id. Auth counters fail
    // closed: this store is in-memory and cannot fail, which keeps that
    // policy trivially true.
    let decision = state
        .limiter
        .increment(&format!("token:{}", credentials.client_id), 60, CLIENT_RATE_LIMIT)
        .await;
    if !decision.allowed {
        warn!(client_id = %credentials.client_id, "token endpoint rate limit tripped");
        return oauth_error_response(&AuthError::RateLimited {
            retry_after_secs: decision.retry_after_secs.unwrap_or(60),
        });
    }

    let client = match authenticate_client(&state.clients, &credentials).await {
        Ok(client) => client,
        Err(e) => {
            warn!(client_id = %credentials.client_id, error = %e, "client authentication failed");
            return oauth_error_response(&e);
        }
    };

    let dpop = match headers.get("dpop").and_then(|v| v.to_str().ok()) {
        Some(proof) => {
            let url = format!("{}/token", state.config.issuer.trim_end_matches('/'));
            match state.dpop.validate(proof, "POST", &url).await {
                Ok(proof) => Some(proof),
                Err(e) => return oauth_error_response(&e),
            }
        }
        None => None,
    };

    match state
        .token_service
        .handle(&request, &client, dpop.as_ref())
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(e) => oauth_error_response(&e),
    }
}
