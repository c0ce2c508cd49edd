//! Store error types.

use oxidp_core::OAuthErrorCode;

/// Errors produced by the sharded stores.
///
/// Variants are deliberately coarse: callers translate them onto the OAuth
/// wire taxonomy with [`StoreError::oauth_error_code`] and never surface the
/// internal distinction to clients beyond what the protocol requires.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key does not exist (or was pruned).
    #[error("not found")]
    NotFound,

    /// The record exists but its TTL has passed.
    #[error("expired")]
    Expired,

    /// The record was already consumed by an earlier request.
    #[error("already consumed")]
    AlreadyConsumed {
        /// Refresh family derived from the first consumption, when known.
        /// Presenting a consumed authorization code revokes this family.
        family_id: Option<String>,
    },

    /// The record is bound to a different client.
    #[error("client mismatch")]
    ClientMismatch,

    /// The presented redirect URI does not match the stored one.
    #[error("redirect mismatch")]
    RedirectMismatch,

    /// PKCE verification failed.
    #[error("PKCE verification failed")]
    PkceMismatch,

    /// The presented DPoP key thumbprint does not match the bound one.
    #[error("DPoP key mismatch")]
    DpopMismatch,

    /// The record (or its family) has been revoked.
    #[error("revoked")]
    Revoked,

    /// A non-tip refresh handle was presented; the family is now revoked.
    #[error("refresh token reuse detected")]
    ReuseDetected {
        /// The family that was revoked in response.
        family_id: String,
    },

    /// Setup has already completed; no further setup tokens may be stored.
    #[error("setup already completed")]
    SetupCompleted,

    /// A store was constructed with an invalid shard count.
    #[error("invalid store configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `InvalidConfig` error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns `true` if the failure means the grant can never succeed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InvalidConfig { .. })
    }

    /// Maps this error onto the OAuth wire taxonomy.
    #[must_use]
    pub fn oauth_error_code(&self) -> OAuthErrorCode {
        match self {
            Self::NotFound
            | Self::Expired
            | Self::AlreadyConsumed { .. }
            | Self::ClientMismatch
            | Self::RedirectMismatch
            | Self::PkceMismatch
            | Self::DpopMismatch
            | Self::Revoked
            | Self::ReuseDetected { .. } => OAuthErrorCode::InvalidGrant,
            Self::SetupCompleted => OAuthErrorCode::AccessDenied,
            Self::InvalidConfig { .. } => OAuthErrorCode::ServerError,
        }
    }
}
