//! # oxidp-core
//!
//! Shared leaf types for the oxidp authorization server.
//!
//! This crate holds everything the protocol and state layers agree on but
//! that belongs to no single one of them:
//!
//! - [`clock`] - millisecond epoch clock with a test-controllable handle
//! - [`cursor`] - opaque pagination cursors for admin listings
//! - [`error`] - the OAuth 2.0 / OIDC wire error taxonomy
//! - [`token`] - opaque token, code, and user-code generation
//! - [`tenant`] - the process-wide tenant mapping

pub mod clock;
pub mod cursor;
pub mod error;
pub mod tenant;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock, UnixMillis};
pub use cursor::{Cursor, CursorError};
pub use error::{ErrorResponse, OAuthErrorCode};
pub use tenant::{Tenant, TenantId, TenantPolicies};
