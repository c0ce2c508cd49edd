//! Protocol-layer error type.
//!
//! [`AuthError`] is the transport-agnostic failure of any protocol
//! operation. It maps onto the wire taxonomy via
//! [`AuthError::oauth_error_code`]; internal detail (storage messages,
//! assertion text) never crosses that boundary.

use oxidp_core::OAuthErrorCode;
use oxidp_store::StoreError;

/// Errors that can occur during protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Client authentication failed or the client is unknown/inactive.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The grant (code, refresh token, device code) cannot be redeemed.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The requested scope is invalid or exceeds the granted scope.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of why the scope is invalid.
        message: String,
    },

    /// The request is missing or repeats a parameter, or is malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The client is not allowed to use this grant or response type.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of the restriction.
        message: String,
    },

    /// The grant type is not supported.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The response type is not supported.
    #[error("Unsupported response type: {response_type}")]
    UnsupportedResponseType {
        /// The unsupported response type.
        response_type: String,
    },

    /// The resource owner or the server denied the request.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of the denial.
        message: String,
    },

    /// Device/CIBA: the user has not decided yet.
    #[error("Authorization pending")]
    AuthorizationPending,

    /// Device/CIBA: polling faster than the interval.
    #[error("Slow down")]
    SlowDown,

    /// Device/CIBA: the request expired before approval.
    #[error("Expired token")]
    ExpiredToken,

    /// An authentication rate limit was exceeded.
    #[error("Rate limit exceeded; retry after {retry_after_secs} s")]
    RateLimited {
        /// Seconds until the window resets.
        retry_after_secs: u64,
    },

    /// A DPoP proof was missing, malformed, or failed validation.
    #[error("Invalid DPoP proof: {message}")]
    InvalidDpopProof {
        /// Description of the proof failure.
        message: String,
    },

    /// Transient storage failure; the client may retry.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `UnsupportedResponseType` error.
    #[must_use]
    pub fn unsupported_response_type(response_type: impl Into<String>) -> Self {
        Self::UnsupportedResponseType {
            response_type: response_type.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidDpopProof` error.
    #[must_use]
    pub fn invalid_dpop_proof(message: impl Into<String>) -> Self {
        Self::InvalidDpopProof {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this failure came from the server, not the client.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Internal { .. })
    }

    /// Maps this error onto the OAuth wire taxonomy.
    #[must_use]
    pub fn oauth_error_code(&self) -> OAuthErrorCode {
        match self {
            Self::InvalidClient { .. } => OAuthErrorCode::InvalidClient,
            Self::InvalidGrant { .. } => OAuthErrorCode::InvalidGrant,
            Self::InvalidScope { .. } => OAuthErrorCode::InvalidScope,
            Self::InvalidRequest { .. } | Self::InvalidDpopProof { .. } => {
                OAuthErrorCode::InvalidRequest
            }
            Self::UnauthorizedClient { .. } => OAuthErrorCode::UnauthorizedClient,
            Self::UnsupportedGrantType { .. } => OAuthErrorCode::UnsupportedGrantType,
            Self::UnsupportedResponseType { .. } => OAuthErrorCode::UnsupportedResponseType,
            Self::AccessDenied { .. } => OAuthErrorCode::AccessDenied,
            Self::AuthorizationPending => OAuthErrorCode::AuthorizationPending,
            Self::SlowDown => OAuthErrorCode::SlowDown,
            Self::ExpiredToken => OAuthErrorCode::ExpiredToken,
            Self::RateLimited { .. } => OAuthErrorCode::RateLimitExceeded,
            Self::Storage { .. } => OAuthErrorCode::TemporarilyUnavailable,
            Self::Internal { .. } => OAuthErrorCode::ServerError,
        }
    }

    /// The description safe to put on the wire.
    ///
    /// Server-side failures collapse to a generic sentence; client-caused
    /// failures keep their description.
    #[must_use]
    pub fn wire_description(&self) -> String {
        if self.is_server_error() {
            "temporarily unable to process the request".to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::invalid_grant("grant not found"),
            StoreError::Expired => Self::invalid_grant("grant expired"),
            StoreError::AlreadyConsumed { .. } => Self::invalid_grant("grant already used"),
            StoreError::ClientMismatch => {
                Self::invalid_grant("grant was issued to a different client")
            }
            StoreError::RedirectMismatch => {
                Self::invalid_grant("redirect_uri does not match the authorization request")
            }
            StoreError::PkceMismatch => Self::invalid_grant("PKCE verification failed"),
            StoreError::DpopMismatch => Self::invalid_grant("DPoP key binding mismatch"),
            StoreError::Revoked => Self::invalid_grant("grant revoked"),
            StoreError::ReuseDetected { .. } => Self::invalid_grant("refresh token reuse detected"),
            StoreError::SetupCompleted => Self::access_denied("setup already completed"),
            StoreError::InvalidConfig { message } => Self::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_code_mapping() {
        assert_eq!(
            AuthError::invalid_client("x").oauth_error_code(),
            OAuthErrorCode::InvalidClient
        );
        assert_eq!(
            AuthError::SlowDown.oauth_error_code(),
            OAuthErrorCode::SlowDown
        );
        assert_eq!(
            AuthError::storage("db down").oauth_error_code(),
            OAuthErrorCode::TemporarilyUnavailable
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let err: AuthError = StoreError::ReuseDetected {
            family_id: "fam".into(),
        }
        .into();
        assert_eq!(err.oauth_error_code(), OAuthErrorCode::InvalidGrant);

        let err: AuthError = StoreError::PkceMismatch.into();
        assert_eq!(err.oauth_error_code(), OAuthErrorCode::InvalidGrant);
    }

    #[test]
    fn test_wire_description_hides_internals() {
        let err = AuthError::internal("index corruption in shard 7");
        assert!(!err.wire_description().contains("shard"));

        let err = AuthError::invalid_request("missing nonce");
        assert!(err.wire_description().contains("nonce"));
    }
}
