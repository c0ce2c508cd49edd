//! Protocol configuration.

use serde::{Deserialize, Serialize};

/// Protocol-level configuration shared by the flow engine, token endpoint,
/// and discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Issuer URL; every minted token carries it and discovery is built
    /// from it.
    pub issuer: String,

    /// Authorization code lifetime in seconds (≤ 600).
    #[serde(default = "default_code_ttl_secs")]
    pub code_ttl_secs: u64,

    /// Access token lifetime in seconds.
    #[serde(default = "default_access_ttl_secs")]
    pub access_token_ttl_secs: u64,

    /// ID token lifetime in seconds.
    #[serde(default = "default_id_ttl_secs")]
    pub id_token_ttl_secs: u64,

    /// Refresh token lifetime in seconds (≤ 30 days).
    #[serde(default = "default_refresh_ttl_secs")]
    pub refresh_token_ttl_secs: u64,

    /// Device flow lifetime in seconds.
    #[serde(default = "default_device_ttl_secs")]
    pub device_code_ttl_secs: u64,

    /// Device/CIBA minimum polling interval in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Acceptance window for DPoP proof `iat`, in seconds (60-120).
    #[serde(default = "default_dpop_window_secs")]
    pub dpop_proof_window_secs: u64,

    /// Session absolute lifetime in seconds.
    #[serde(default = "default_session_absolute_ttl_secs")]
    pub session_absolute_ttl_secs: u64,

    /// Session idle lifetime in seconds.
    #[serde(default = "default_session_idle_ttl_secs")]
    pub session_idle_ttl_secs: u64,

    /// Grace period retired signing keys stay in the JWKS, in seconds.
    #[serde(default = "default_key_grace_secs")]
    pub key_grace_period_secs: u64,

    /// Scopes the server advertises.
    #[serde(default = "default_scopes")]
    pub scopes_supported: Vec<String>,

    /// Session cookie `SameSite=None` (cross-site flows); `Lax` otherwise.
    #[serde(default)]
    pub cookie_same_site_none: bool,
}

fn default_code_ttl_secs() -> u64 {
    600
}

fn default_access_ttl_secs() -> u64 {
    3_600
}

fn default_id_ttl_secs() -> u64 {
    3_600
}

fn default_refresh_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_device_ttl_secs() -> u64 {
    600
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_dpop_window_secs() -> u64 {
    120
}

fn default_session_absolute_ttl_secs() -> u64 {
    12 * 60 * 60
}

fn default_session_idle_ttl_secs() -> u64 {
    60 * 60
}

fn default_key_grace_secs() -> u64 {
    72 * 60 * 60
}

fn default_scopes() -> Vec<String> {
    ["openid", "profile", "email", "offline_access"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl AuthConfig {
    /// Creates a configuration with defaults for the given issuer.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            code_ttl_secs: default_code_ttl_secs(),
            access_token_ttl_secs: default_access_ttl_secs(),
            id_token_ttl_secs: default_id_ttl_secs(),
            refresh_token_ttl_secs: default_refresh_ttl_secs(),
            device_code_ttl_secs: default_device_ttl_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            dpop_proof_window_secs: default_dpop_window_secs(),
            session_absolute_ttl_secs: default_session_absolute_ttl_secs(),
            session_idle_ttl_secs: default_session_idle_ttl_secs(),
            key_grace_period_secs: default_key_grace_secs(),
            scopes_supported: default_scopes(),
            cookie_same_site_none: false,
        }
    }
}
