//! Token claims, minting, and the token endpoint state machine.

pub mod claims;
pub mod introspection;
pub mod mint;
pub mod service;

pub use claims::{AccessTokenClaims, Confirmation, IdTokenClaims};
pub use introspection::IntrospectionResponse;
pub use mint::{AccessTokenContext, IdTokenContext, MintedAccessToken, TokenMinter};
pub use service::TokenService;
