//! Client authentication for the token and admin endpoints.
//!
//! Clients authenticate per their registered `token_endpoint_auth_method`:
//! `client_secret_basic` (Authorization header), `client_secret_post`
//! (form body), or `none` (public clients carrying PKCE).

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::warn;

use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::ClientStore;
use crate::types::{Client, ClientAuthMethod, ClientType};

/// Credentials presented with a request, and how they arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Presented client identifier.
    pub client_id: String,

    /// Presented secret, when one arrived.
    pub client_secret: Option<String>,

    /// Whether the credentials came from an HTTP Basic header.
    pub via_basic: bool,
}

/// Extracts client credentials from the Authorization header or the form
/// body. The header wins when both are present.
///
/// # Errors
///
/// Returns `InvalidClient` when a Basic header is present but malformed, or
/// when no client identification arrived at all.
pub fn extract_credentials(
    authorization: Option<&str>,
    body_client_id: Option<&str>,
    body_client_secret: Option<&str>,
) -> AuthResult<ClientCredentials> {
    if let Some(header) = authorization {
        if let Some(encoded) = header.strip_prefix("Basic ") {
            let decoded = STANDARD
                .decode(encoded.trim())
                .map_err(|_| AuthError::invalid_client("malformed Basic authorization header"))?;
            let decoded = String::from_utf8(decoded)
                .map_err(|_| AuthError::invalid_client("malformed Basic authorization header"))?;
            let (id, secret) = decoded
                .split_once(':')
                .ok_or_else(|| AuthError::invalid_client("malformed Basic credentials"))?;
            if id.is_empty() {
                return Err(AuthError::invalid_client("empty client_id"));
            }
            return Ok(ClientCredentials {
                client_id: id.to_string(),
                client_secret: Some(secret.to_string()),
                via_basic: true,
            });
        }
        // A non-Basic Authorization header (e.g. DPoP-bound Bearer) is not
        // client authentication; fall through to the body.
    }

    let client_id = body_client_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AuthError::invalid_client("missing client identification"))?;

    Ok(ClientCredentials {
        client_id: client_id.to_string(),
        client_secret: body_client_secret.map(String::from),
        via_basic: false,
    })
}

/// Resolves and authenticates a client.
///
/// # Errors
///
/// Returns `InvalidClient` for unknown or inactive clients, wrong secrets,
/// or credentials delivered through a channel the registration forbids.
pub async fn authenticate_client(
    store: &Arc<dyn ClientStore>,
    credentials: &ClientCredentials,
) -> AuthResult<Client> {
    let client = store
        .find_by_id(&credentials.client_id)
        .await?
        .ok_or_else(|| AuthError::invalid_client("unknown client"))?;

    if !client.active {
        warn!(client_id = %client.client_id, "rejected inactive client");
        return Err(AuthError::invalid_client("client is not active"));
    }

    match client.token_endpoint_auth_method {
        ClientAuthMethod::None => {
            if client.client_type == ClientType::Confidential {
                return Err(AuthError::invalid_client(
                    "confidential client must authenticate",
                ));
            }
            // Public clients present no secret; ignore a stray one.
            Ok(client)
        }
        ClientAuthMethod::ClientSecretBasic | ClientAuthMethod::ClientSecretPost => {
            let expected_basic =
                client.token_endpoint_auth_method == ClientAuthMethod::ClientSecretBasic;
            if credentials.via_basic != expected_basic {
                return Err(AuthError::invalid_client(
                    "credentials sent through the wrong channel",
                ));
            }
            let secret = credentials
                .client_secret
                .as_deref()
                .ok_or_else(|| AuthError::invalid_client("missing client secret"))?;
            if !client.verify_secret(secret) {
                warn!(client_id = %client.client_id, "client secret verification failed");
                return Err(AuthError::invalid_client("invalid client credentials"));
            }
            Ok(client)
        }
    }
}
