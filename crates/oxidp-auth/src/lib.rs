//! # oxidp-auth
//!
//! OAuth 2.0 / OpenID Connect protocol engine for the oxidp authorization
//! server.
//!
//! This crate provides:
//! - The `/authorize` flow engine (response types, PKCE, PAR, nonce,
//!   prompt handling, consent, response modes)
//! - The token endpoint state machine (`authorization_code`,
//!   `refresh_token`, device, and CIBA grants, refresh rotation with reuse
//!   detection, DPoP binding)
//! - Per-tenant signing key management with rotation and JWKS publication
//! - JWT access token and ID token minting, including `c_hash` / `at_hash`
//! - Introspection (RFC 7662), revocation (RFC 7009), and discovery
//!
//! ## Modules
//!
//! - [`config`] - protocol configuration (issuer, lifetimes, DPoP window)
//! - [`oauth`] - PKCE, client authentication, DPoP proofs, request types
//! - [`flow`] - the `/authorize` state machine
//! - [`keys`] - per-tenant signing keys, rotation, JWKS
//! - [`token`] - claims, minting, and the token endpoint service
//! - [`http`] - Axum handlers for every protocol endpoint
//! - [`storage`] - client registry trait and in-memory implementation

pub mod config;
pub mod error;
pub mod flow;
pub mod http;
pub mod keys;
pub mod oauth;
pub mod storage;
pub mod token;
pub mod types;

pub use config::AuthConfig;
pub use error::AuthError;
pub use types::{Client, ClientAuthMethod, ClientType, GrantType};

/// Type alias for protocol-layer results.
pub type AuthResult<T> = Result<T, AuthError>;
