//! OAuth 2.0 building blocks: PKCE, client authentication, DPoP proofs,
//! and the authorization / token endpoint wire types.

pub mod authorize;
pub mod client_auth;
pub mod dpop;
pub mod pkce;
pub mod token;

pub use authorize::{AuthorizationRequest, ResponseMode, ResponseType, ResponseTypeSet};
pub use client_auth::{ClientCredentials, authenticate_client, extract_credentials};
pub use dpop::{DpopProof, DpopValidator, jwk_thumbprint};
pub use pkce::{PkceChallenge, PkceError, PkceVerifier};
pub use token::{TokenRequest, TokenResponse};
