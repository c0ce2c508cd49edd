//! OAuth 2.0 client domain types.
//!
//! A client registration pins everything the flow engine and token endpoint
//! validate against: redirect URIs, allowed grant and response types,
//! allowed scopes, the authentication method, and the PKCE / DPoP posture.

use argon2::password_hash::PasswordHash;
use argon2::{Argon2, PasswordVerifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Grant Type
// =============================================================================

/// OAuth 2.0 grant types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization Code flow (with PKCE for public clients).
    AuthorizationCode,
    /// Refresh Token flow.
    RefreshToken,
    /// Device Authorization Grant (RFC 8628).
    DeviceCode,
    /// Client-Initiated Backchannel Authentication.
    Ciba,
}

impl GrantType {
    /// Returns the OAuth 2.0 `grant_type` parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
            Self::Ciba => "urn:openid:params:grant-type:ciba",
        }
    }

    /// Parses a `grant_type` parameter value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "refresh_token" => Some(Self::RefreshToken),
            "urn:ietf:params:oauth:grant-type:device_code" => Some(Self::DeviceCode),
            "urn:openid:params:grant-type:ciba" => Some(Self::Ciba),
            _ => None,
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Client Type & Authentication Method
// =============================================================================

/// Whether a client can keep a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// Server-side client with a secret.
    Confidential,
    /// Browser or native client; PKCE carries the proof instead.
    Public,
}

/// Token endpoint authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `client_id` / `client_secret` in the form body.
    ClientSecretPost,
    /// HTTP Basic authentication.
    ClientSecretBasic,
    /// No client authentication; public clients with PKCE.
    None,
}

impl ClientAuthMethod {
    /// Returns the registered metadata value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientSecretPost => "client_secret_post",
            Self::ClientSecretBasic => "client_secret_basic",
            Self::None => "none",
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// An OAuth 2.0 client registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    /// Unique client identifier used in OAuth flows.
    pub client_id: String,

    /// Owning tenant.
    pub tenant_id: String,

    /// Confidential or public.
    pub client_type: ClientType,

    /// Argon2-hashed client secret (confidential clients only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_hash: Option<String>,

    /// Allowed redirect URIs.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Grant types this client may use.
    pub allowed_grant_types: Vec<GrantType>,

    /// Response type combinations this client may request, canonicalized
    /// (space-separated tokens in sorted order, e.g. `"code id_token"`).
    #[serde(default)]
    pub allowed_response_types: Vec<String>,

    /// Scopes this client may request. Empty means any scope.
    #[serde(default)]
    pub allowed_scopes: Vec<String>,

    /// How the client authenticates at the token endpoint.
    pub token_endpoint_auth_method: ClientAuthMethod,

    /// Whether PKCE is required regardless of client type.
    #[serde(default)]
    pub require_pkce: bool,

    /// Whether every token request must carry a DPoP proof.
    #[serde(default)]
    pub require_dpop: bool,

    /// Client public keys, when registered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks: Option<Value>,

    /// Whether the client is active.
    pub active: bool,
}

impl Client {
    /// Validates the registration itself.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.client_id.is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }
        if self.client_type == ClientType::Confidential && self.client_secret_hash.is_none() {
            return Err(ClientValidationError::MissingSecret);
        }
        if self.client_type == ClientType::Public && self.client_secret_hash.is_some() {
            return Err(ClientValidationError::PublicClientWithSecret);
        }
        if self
            .allowed_grant_types
            .contains(&GrantType::AuthorizationCode)
            && self.redirect_uris.is_empty()
        {
            return Err(ClientValidationError::NoRedirectUris);
        }
        Ok(())
    }

    /// Verifies a presented secret against the stored argon2 hash.
    ///
    /// Always `false` for public clients and malformed hashes.
    #[must_use]
    pub fn verify_secret(&self, presented: &str) -> bool {
        let Some(hash) = &self.client_secret_hash else {
            return false;
        };
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(presented.as_bytes(), &parsed)
            .is_ok()
    }

    /// Returns `true` if the scope string (space-separated) is within the
    /// client's allowed scopes.
    #[must_use]
    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        if self.allowed_scopes.is_empty() {
            return true;
        }
        scope
            .split_whitespace()
            .all(|s| self.allowed_scopes.iter().any(|allowed| allowed == s))
    }

    /// Returns `true` if the client may use the grant type.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: GrantType) -> bool {
        self.allowed_grant_types.contains(&grant_type)
    }

    /// Returns `true` if the canonicalized response type is registered.
    #[must_use]
    pub fn is_response_type_allowed(&self, canonical: &str) -> bool {
        self.allowed_response_types.iter().any(|r| r == canonical)
    }

    /// PKCE posture: public clients always; confidential when registered so.
    #[must_use]
    pub fn requires_pkce(&self) -> bool {
        self.require_pkce || self.client_type == ClientType::Public
    }
}

/// Errors found when validating a client registration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClientValidationError {
    /// The client_id is empty.
    #[error("client_id must not be empty")]
    EmptyClientId,

    /// A confidential client has no secret hash.
    #[error("confidential client requires a client secret")]
    MissingSecret,

    /// A public client carries a secret.
    #[error("public client must not have a client secret")]
    PublicClientWithSecret,

    /// Authorization code clients need at least one redirect URI.
    #[error("authorization_code client requires at least one redirect URI")]
    NoRedirectUris,
}
