//! `GET /.well-known/jwks.json` handler.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::http::OpState;

/// Publishes the tenant's current JWKS: active and next keys, plus retired
/// keys still inside the rotation grace period.
pub async fn jwks_handler(State(state): State<OpState>) -> Response {
    match state.keys.public_jwks(&state.tenant.tenant_id).await {
        Ok(jwks) => (
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CACHE_CONTROL, "public, max-age=3600"),
                (header::VARY, "Accept-Encoding"),
            ],
            Json(jwks),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "JWKS publication failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
