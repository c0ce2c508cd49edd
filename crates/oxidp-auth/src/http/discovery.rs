//! `GET /.well-known/openid-configuration` handler.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{Value, json};

use crate::http::OpState;

/// OpenID Provider discovery document.
///
/// Every endpoint URL shares the issuer prefix. The document is stable for
/// a deployment, so it is served cacheable.
pub async fn discovery_handler(State(state): State<OpState>) -> impl IntoResponse {
    let doc = discovery_document(&state.config.issuer, &state.config.scopes_supported);

    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
            (header::VARY, "Accept-Encoding"),
        ],
        Json(doc),
    )
}

/// Builds the provider metadata for `issuer`.
#[must_use]
pub fn discovery_document(issuer: &str, scopes_supported: &[String]) -> Value {
    let issuer = issuer.trim_end_matches('/');

    json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "userinfo_endpoint": format!("{issuer}/userinfo"),
        "jwks_uri": format!("{issuer}/.well-known/jwks.json"),
        "pushed_authorization_request_endpoint": format!("{issuer}/par"),
        "device_authorization_endpoint": format!("{issuer}/device_authorization"),
        "introspection_endpoint": format!("{issuer}/introspect"),
        "revocation_endpoint": format!("{issuer}/revoke"),
        "response_types_supported": [
            "code", "id_token", "token",
            "code id_token", "code token", "id_token token", "code id_token token",
        ],
        "response_modes_supported": ["query", "fragment", "form_post"],
        "grant_types_supported": [
            "authorization_code",
            "refresh_token",
            "urn:ietf:params:oauth:grant-type:device_code",
            "urn:openid:params:grant-type:ciba",
        ],
        "id_token_signing_alg_values_supported": ["RS256", "ES256", "EdDSA"],
        "subject_types_supported": ["public"],
        "scopes_supported": scopes_supported,
        "claims_supported": [
            "sub", "iss", "aud", "exp", "iat", "auth_time", "nonce",
            "name", "email", "acr", "amr",
        ],
        "token_endpoint_auth_methods_supported": [
            "client_secret_post", "client_secret_basic", "none",
        ],
        "code_challenge_methods_supported": ["S256"],
        "dpop_signing_alg_values_supported": ["ES256", "RS256", "EdDSA"],
    })
}
