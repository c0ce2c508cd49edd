//! Admin surface endpoints: setup token and consent management.
//!
//! `POST /admin/setup/token` stores the one-shot setup token; it is guarded
//! by the deployment's admin API secret. `POST /admin/setup/claim` consumes
//! the token. Once claimed, the completion marker permanently blocks both.
//! `POST /admin/consent/revoke` withdraws a user's consent for a client.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use oxidp_core::token::generate_token;
use oxidp_store::{DEFAULT_SETUP_TTL_MS, StoreError};

use crate::http::OpState;

/// Body of a setup claim request.
#[derive(Debug, Deserialize)]
pub struct SetupClaimRequest {
    /// The setup token delivered out of band.
    pub token: String,
}

/// Mints and stores the setup token. Requires the admin API secret in the
/// `X-Admin-Secret` header.
pub async fn setup_token_handler(State(state): State<OpState>, headers: HeaderMap) -> Response {
    if !admin_secret_matches(&state, &headers) {
        warn!("setup token request with bad admin secret");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let token = generate_token(32);
    match state.setup.store_token(&token, DEFAULT_SETUP_TTL_MS).await {
        Ok(()) => {
            info!("setup token issued");
            (
                StatusCode::CREATED,
                Json(json!({
                    "setup_token": token,
                    "expires_in": DEFAULT_SETUP_TTL_MS / 1_000,
                })),
            )
                .into_response()
        }
        Err(StoreError::SetupCompleted) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "setup_completed"})),
        )
            .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Claims the setup token, completing initial setup exactly once.
pub async fn setup_claim_handler(
    State(state): State<OpState>,
    Json(request): Json<SetupClaimRequest>,
) -> Response {
    match state.setup.consume(&request.token).await {
        Ok(()) => {
            info!("initial setup completed");
            Json(json!({"completed": true})).into_response()
        }
        Err(StoreError::SetupCompleted) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "setup_completed"})),
        )
            .into_response(),
        Err(_) => StatusCode::FORBIDDEN.into_response(),
    }
}

/// Body of an admin consent revocation.
#[derive(Debug, Deserialize)]
pub struct ConsentRevocationRequest {
    /// The user whose consent is withdrawn.
    pub user_id: String,

    /// The client the consent covered.
    pub client_id: String,
}

/// Withdraws a user's recorded consent for a client. Idempotent; guarded
/// by the admin API secret.
pub async fn admin_consent_revoke_handler(
    State(state): State<OpState>,
    headers: HeaderMap,
    Json(request): Json<ConsentRevocationRequest>,
) -> Response {
    if !admin_secret_matches(&state, &headers) {
        warn!("consent revocation with bad admin secret");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match state
        .consent
        .revoke(&request.user_id, &request.client_id)
        .await
    {
        Ok(()) => {
            info!(user_id = %request.user_id, client_id = %request.client_id, "consent revoked");
            Json(json!({"revoked": true})).into_response()
        }
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

fn admin_secret_matches(state: &OpState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.admin_secret.as_deref() else {
        return false;
    };
    let Some(presented) = headers.get("x-admin-secret").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    expected.as_bytes().ct_eq(presented.as_bytes()).unwrap_u8() == 1
}
