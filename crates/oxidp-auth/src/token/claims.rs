//! JWT claim structures for access and ID tokens.

use serde::{Deserialize, Serialize};

/// Confirmation claim for sender-constrained tokens (RFC 7800).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// RFC 7638 thumbprint of the DPoP key the token is bound to.
    pub jkt: String,
}

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject.
    pub sub: String,

    /// Audience.
    pub aud: String,

    /// Expiration, epoch seconds.
    pub exp: i64,

    /// Issued at, epoch seconds.
    pub iat: i64,

    /// Token identifier; the revocation key.
    pub jti: String,

    /// Granted scopes (space-separated).
    pub scope: String,

    /// Client the token was issued to.
    pub client_id: String,

    /// Authentication method references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amr: Vec<String>,

    /// Authentication context class reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,

    /// Key binding for DPoP-bound tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cnf: Option<Confirmation>,
}

/// ID token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject.
    pub sub: String,

    /// Audience: the client id.
    pub aud: String,

    /// Expiration, epoch seconds.
    pub exp: i64,

    /// Issued at, epoch seconds.
    pub iat: i64,

    /// When the user authenticated, epoch seconds.
    pub auth_time: u64,

    /// Nonce from the authorization request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Authentication context class reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,

    /// Authentication method references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amr: Vec<String>,

    /// Left-half hash of the access token issued alongside.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,

    /// Left-half hash of the code issued alongside.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c_hash: Option<String>,
}
