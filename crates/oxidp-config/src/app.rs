//! Process configuration.
//!
//! Configuration layers, later sources overriding earlier ones:
//!
//! 1. `oxidp.toml` in the working directory, when present
//! 2. Environment variables with the `OXIDP_` prefix
//!    (`OXIDP_SERVER__PORT=8443`)
//! 3. The flat compatibility keys other deployments already set:
//!    `ISSUER_URL`, `KEY_ID`, `*_SHARDS`, `KEY_MANAGER_SECRET`,
//!    `ADMIN_API_SECRET`, `ALLOWED_ORIGINS`, `COOKIE_SAME_SITE`

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A source failed to load or parse.
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),

    /// A value failed validation.
    #[error("invalid configuration: {message}")]
    Invalid {
        /// Description of the invalid value.
        message: String,
    },
}

impl ConfigError {
    /// Creates a new `Invalid` error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// `SameSite` attribute for the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CookieSameSite {
    /// Cookies ride on top-level navigation only.
    Lax,
    /// Cookies ride cross-site; requires `Secure`.
    None,
}

impl CookieSameSite {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "Lax" => Ok(Self::Lax),
            "None" => Ok(Self::None),
            other => Err(ConfigError::invalid(format!(
                "COOKIE_SAME_SITE must be Lax or None, got {other}"
            ))),
        }
    }
}

/// Shard counts per store. Each must be a nonzero power of two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Authorization code shards.
    #[serde(default = "default_code_shards")]
    pub code_shards: usize,

    /// Session shards.
    #[serde(default = "default_session_shards")]
    pub session_shards: usize,

    /// Challenge shards.
    #[serde(default = "default_challenge_shards")]
    pub challenge_shards: usize,

    /// Flow state shards.
    #[serde(default = "default_flow_state_shards")]
    pub flow_state_shards: usize,

    /// Refresh family shards.
    #[serde(default = "default_session_shards")]
    pub refresh_shards: usize,

    /// Shards for everything else (JTIs, revocations, counters, PAR,
    /// device codes).
    #[serde(default = "default_challenge_shards")]
    pub misc_shards: usize,
}

fn default_code_shards() -> usize {
    64
}

fn default_session_shards() -> usize {
    32
}

fn default_challenge_shards() -> usize {
    16
}

fn default_flow_state_shards() -> usize {
    32
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            code_shards: default_code_shards(),
            session_shards: default_session_shards(),
            challenge_shards: default_challenge_shards(),
            flow_state_shards: default_flow_state_shards(),
            refresh_shards: default_session_shards(),
            misc_shards: default_challenge_shards(),
        }
    }
}

/// Server socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// The process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Issuer URL.
    pub issuer: String,

    /// Server socket.
    #[serde(default)]
    pub server: ServerConfig,

    /// Shard counts.
    #[serde(default)]
    pub shards: ShardConfig,

    /// Pinned signing key id, when the deployment pre-provisions one.
    #[serde(default)]
    pub key_id: Option<String>,

    /// Secret wrapping exported key material.
    #[serde(default)]
    pub key_manager_secret: Option<String>,

    /// Shared secret protecting the admin surface.
    #[serde(default)]
    pub admin_api_secret: Option<String>,

    /// Origins allowed by the CORS layer.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Session cookie `SameSite` attribute.
    #[serde(default = "default_same_site")]
    pub cookie_same_site: CookieSameSite,

    /// CORE database URL, when a relational backend is configured.
    #[serde(default)]
    pub core_database_url: Option<String>,

    /// Per-statement storage deadline, e.g. `"2s"` or `"1500ms"`.
    #[serde(default = "default_storage_deadline", with = "humantime_serde")]
    pub storage_deadline: std::time::Duration,
}

fn default_storage_deadline() -> std::time::Duration {
    std::time::Duration::from_secs(2)
}

fn default_same_site() -> CookieSameSite {
    CookieSameSite::Lax
}

impl AppConfig {
    /// Loads configuration from files and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is fine; a malformed one is not worth dying
        // over either.
        let _ = dotenvy::dotenv();

        let mut config: AppConfig = Config::builder()
            .add_source(File::with_name("oxidp").required(false))
            .add_source(Environment::with_prefix("OXIDP").separator("__"))
            .set_default("issuer", "http://localhost:8080")?
            .build()?
            .try_deserialize()?;

        config.apply_compat_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies the flat compatibility environment keys.
    fn apply_compat_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(issuer) = std::env::var("ISSUER_URL") {
            self.issuer = issuer;
        }
        if let Ok(key_id) = std::env::var("KEY_ID") {
            self.key_id = Some(key_id);
        }
        if let Ok(secret) = std::env::var("KEY_MANAGER_SECRET") {
            self.key_manager_secret = Some(secret);
        }
        if let Ok(secret) = std::env::var("ADMIN_API_SECRET") {
            self.admin_api_secret = Some(secret);
        }
        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            self.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Ok(same_site) = std::env::var("COOKIE_SAME_SITE") {
            self.cookie_same_site = CookieSameSite::parse(&same_site)?;
        }

        apply_shard_env("CODE_SHARDS", &mut self.shards.code_shards)?;
        apply_shard_env("SESSION_SHARDS", &mut self.shards.session_shards)?;
        apply_shard_env("CHALLENGE_SHARDS", &mut self.shards.challenge_shards)?;
        apply_shard_env("FLOW_STATE_SHARDS", &mut self.shards.flow_state_shards)?;
        apply_shard_env("REFRESH_SHARDS", &mut self.shards.refresh_shards)?;
        apply_shard_env("MISC_SHARDS", &mut self.shards.misc_shards)?;
        Ok(())
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::invalid("issuer must not be empty"));
        }
        for (name, count) in [
            ("code_shards", self.shards.code_shards),
            ("session_shards", self.shards.session_shards),
            ("challenge_shards", self.shards.challenge_shards),
            ("flow_state_shards", self.shards.flow_state_shards),
            ("refresh_shards", self.shards.refresh_shards),
            ("misc_shards", self.shards.misc_shards),
        ] {
            if count == 0 || !count.is_power_of_two() {
                return Err(ConfigError::invalid(format!(
                    "{name} must be a nonzero power of two, got {count}"
                )));
            }
        }
        Ok(())
    }
}

fn apply_shard_env(env_key: &str, target: &mut usize) -> Result<(), ConfigError> {
    if let Ok(raw) = std::env::var(env_key) {
        *target = raw.parse().map_err(|_| {
            ConfigError::invalid(format!("{env_key} must be an integer, got {raw}"))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig {
            issuer: "https://op.example".into(),
            server: ServerConfig::default(),
            shards: ShardConfig::default(),
            key_id: None,
            key_manager_secret: None,
            admin_api_secret: None,
            allowed_origins: vec![],
            cookie_same_site: CookieSameSite::Lax,
            core_database_url: None,
            storage_deadline: default_storage_deadline(),
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.shards.code_shards, 64);
        assert_eq!(config.shards.session_shards, 32);
        assert_eq!(config.shards.challenge_shards, 16);
    }

    #[test]
    fn test_shard_counts_must_be_powers_of_two() {
        let mut config: AppConfig =
            serde_json::from_str(r#"{"issuer": "https://op.example"}"#).unwrap();
        config.shards.code_shards = 48;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_deadline_parses_humantime() {
        let config: AppConfig = serde_json::from_str(
            r#"{"issuer": "https://op.example", "storage_deadline": "1500ms"}"#,
        )
        .unwrap();
        assert_eq!(config.storage_deadline.as_millis(), 1_500);
    }

    #[test]
    fn test_same_site_parse() {
        assert_eq!(CookieSameSite::parse("Lax").unwrap(), CookieSameSite::Lax);
        assert_eq!(CookieSameSite::parse("None").unwrap(), CookieSameSite::None);
        assert!(CookieSameSite::parse("Strict").is_err());
    }
}
