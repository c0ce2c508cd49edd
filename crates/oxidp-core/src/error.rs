//! OAuth 2.0 / OIDC wire error taxonomy.
//!
//! Every protocol-visible failure in the system maps to one of these codes.
//! Internal errors (storage faults, assertion failures) are translated at the
//! boundary and never leak their messages onto the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// OAuth 2.0 error codes used across the authorization and token endpoints.
///
/// The set is the union of RFC 6749, RFC 8628 (device flow), and OIDC Core
/// interaction errors, plus the rate-limit code surfaced by the
/// authentication counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthErrorCode {
    /// The request is missing a parameter, repeats one, or is malformed.
    InvalidRequest,
    /// Client authentication failed or the client is unknown.
    InvalidClient,
    /// The grant (code, refresh token, device code) is invalid, expired,
    /// consumed, or revoked.
    InvalidGrant,
    /// The requested scope is invalid or exceeds what was granted.
    InvalidScope,
    /// The client is not allowed to use this grant or response type.
    UnauthorizedClient,
    /// The grant type is not supported by this server.
    UnsupportedGrantType,
    /// The response type is not supported by this server.
    UnsupportedResponseType,
    /// The resource owner or the server denied the request.
    AccessDenied,
    /// Device/CIBA flow: the user has not yet approved the request.
    AuthorizationPending,
    /// Device/CIBA flow: the client is polling faster than the interval.
    SlowDown,
    /// Device/CIBA flow: the request expired before approval.
    ExpiredToken,
    /// OIDC: authentication is required but `prompt=none` was requested.
    LoginRequired,
    /// OIDC: consent is required but `prompt=none` was requested.
    ConsentRequired,
    /// OIDC: some interaction is required but `prompt=none` was requested.
    InteractionRequired,
    /// An unexpected server-side condition.
    ServerError,
    /// Transient overload or storage unavailability; safe to retry.
    TemporarilyUnavailable,
    /// The caller exceeded an authentication rate limit.
    RateLimitExceeded,
}

impl OAuthErrorCode {
    /// Returns the wire representation of this error code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidScope => "invalid_scope",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::AccessDenied => "access_denied",
            Self::AuthorizationPending => "authorization_pending",
            Self::SlowDown => "slow_down",
            Self::ExpiredToken => "expired_token",
            Self::LoginRequired => "login_required",
            Self::ConsentRequired => "consent_required",
            Self::InteractionRequired => "interaction_required",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::RateLimitExceeded => "rate_limit_exceeded",
        }
    }

    /// HTTP status for this code on the token endpoint.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidClient => 401,
            Self::AccessDenied => 403,
            Self::RateLimitExceeded => 429,
            Self::ServerError => 500,
            Self::TemporarilyUnavailable => 503,
            _ => 400,
        }
    }

    /// Returns `true` if a client may retry the identical request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationPending
                | Self::SlowDown
                | Self::TemporarilyUnavailable
                | Self::RateLimitExceeded
        )
    }
}

impl fmt::Display for OAuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// JSON error body returned by the token and admin endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// OAuth 2.0 error code.
    pub error: OAuthErrorCode,

    /// Human-readable description. Never contains internal detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// Seconds the caller should wait, for rate-limit errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    /// Creates an error response without a description.
    #[must_use]
    pub fn new(error: OAuthErrorCode) -> Self {
        Self {
            error,
            error_description: None,
            retry_after: None,
        }
    }

    /// Creates an error response with a description.
    #[must_use]
    pub fn with_description(error: OAuthErrorCode, description: impl Into<String>) -> Self {
        Self {
            error,
            error_description: Some(description.into()),
            retry_after: None,
        }
    }

    /// Attaches a retry-after hint in seconds.
    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(OAuthErrorCode::InvalidRequest.as_str(), "invalid_request");
        assert_eq!(OAuthErrorCode::SlowDown.as_str(), "slow_down");
        assert_eq!(
            OAuthErrorCode::AuthorizationPending.as_str(),
            "authorization_pending"
        );
        assert_eq!(
            OAuthErrorCode::TemporarilyUnavailable.as_str(),
            "temporarily_unavailable"
        );
    }

    #[test]
    fn test_error_code_serde_matches_wire() {
        let json = serde_json::to_string(&OAuthErrorCode::InvalidGrant).unwrap();
        assert_eq!(json, "\"invalid_grant\"");

        let code: OAuthErrorCode = serde_json::from_str("\"rate_limit_exceeded\"").unwrap();
        assert_eq!(code, OAuthErrorCode::RateLimitExceeded);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(OAuthErrorCode::InvalidRequest.http_status(), 400);
        assert_eq!(OAuthErrorCode::InvalidClient.http_status(), 401);
        assert_eq!(OAuthErrorCode::AccessDenied.http_status(), 403);
        assert_eq!(OAuthErrorCode::RateLimitExceeded.http_status(), 429);
        assert_eq!(OAuthErrorCode::TemporarilyUnavailable.http_status(), 503);
    }

    #[test]
    fn test_retryable_codes() {
        assert!(OAuthErrorCode::SlowDown.is_retryable());
        assert!(OAuthErrorCode::AuthorizationPending.is_retryable());
        assert!(!OAuthErrorCode::InvalidGrant.is_retryable());
    }

    #[test]
    fn test_error_response_serialization() {
        let body = ErrorResponse::with_description(
            OAuthErrorCode::InvalidGrant,
            "authorization code consumed",
        );
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""error":"invalid_grant""#));
        assert!(json.contains(r#""error_description":"authorization code consumed""#));
        assert!(!json.contains("retry_after"));

        let limited = ErrorResponse::new(OAuthErrorCode::RateLimitExceeded).with_retry_after(30);
        let json = serde_json::to_string(&limited).unwrap();
        assert!(json.contains(r#""retry_after":30"#));
    }
}
