//! Router assembly.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use oxidp_auth::http::{
    OpState, admin_consent_revoke_handler, authorize_handler, backchannel_authorize_handler,
    consent_handler, device_authorization_handler, device_verify_handler, discovery_handler,
    introspect_handler, jwks_handler, login_handler, par_handler, revoke_handler,
    setup_claim_handler, setup_token_handler, token_handler,
};
use oxidp_storage::DynAdapter;

use crate::bootstrap::AppContext;

/// Health handler state.
#[derive(Clone)]
struct HealthState {
    core_adapter: Option<DynAdapter>,
}

/// Builds the application router.
pub fn build_router(app: &AppContext) -> Router {
    let cors = cors_layer(&app.config.allowed_origins);

    let protocol = Router::new()
        .route("/.well-known/openid-configuration", get(discovery_handler))
        .route("/.well-known/jwks.json", get(jwks_handler))
        .route("/authorize", get(authorize_handler))
        .route("/login", post(login_handler))
        .route("/consent", post(consent_handler))
        .route("/par", post(par_handler))
        .route("/token", post(token_handler))
        .route("/revoke", post(revoke_handler))
        .route("/introspect", post(introspect_handler))
        .route("/device_authorization", post(device_authorization_handler))
        .route("/device/verify", post(device_verify_handler))
        .route("/bc-authorize", post(backchannel_authorize_handler))
        .route("/admin/setup/token", post(setup_token_handler))
        .route("/admin/setup/claim", post(setup_claim_handler))
        .route("/admin/consent/revoke", post(admin_consent_revoke_handler))
        .with_state(app.op_state.clone());

    let health = Router::new()
        .route("/healthz", get(healthz_handler))
        .with_state(HealthState {
            core_adapter: app.core_adapter.clone(),
        });

    protocol
        .merge(health)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let mut layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring unparseable allowed origin");
                None
            }
        })
        .collect();

    if !origins.is_empty() {
        layer = layer.allow_origin(origins);
    }
    layer
}

/// `GET /healthz`: process liveness plus adapter health when configured.
async fn healthz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let storage = match &state.core_adapter {
        Some(adapter) => {
            let health = adapter.health().await;
            json!({
                "healthy": health.healthy,
                "latency_ms": health.latency_ms,
            })
        }
        None => json!({"healthy": true, "backend": "memory"}),
    };

    Json(json!({
        "status": "ok",
        "storage": storage,
    }))
}
