//! PKCE (RFC 7636), S256 only.
//!
//! The `plain` method is rejected outright: it offers no protection against
//! a leaked authorization code, which is the attack PKCE exists to stop.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// Errors that can occur during PKCE operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PkceError {
    /// Verifier length is outside the 43-128 character range.
    #[error("invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains characters outside `[A-Za-z0-9-._~]`.
    #[error("invalid verifier characters")]
    InvalidVerifierCharacters,

    /// The challenge is not valid base64url.
    #[error("invalid challenge format")]
    InvalidChallengeFormat,

    /// A method other than S256 was requested.
    #[error("unsupported code_challenge_method: {0}")]
    UnsupportedMethod(String),

    /// The verifier does not hash to the challenge.
    #[error("verifier does not match challenge")]
    VerificationFailed,
}

/// PKCE code verifier.
///
/// RFC 7636 §4.1: 43-128 characters from the unreserved set
/// `[A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Validates and wraps a verifier received on the wire.
    pub fn new(verifier: impl Into<String>) -> Result<Self, PkceError> {
        let verifier = verifier.into();
        let len = verifier.len();
        if !(43..=128).contains(&len) {
            return Err(PkceError::InvalidVerifierLength(len));
        }
        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(PkceError::InvalidVerifierCharacters);
        }
        Ok(Self(verifier))
    }

    /// The verifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// PKCE code challenge: `BASE64URL(SHA256(ASCII(code_verifier)))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Validates the `code_challenge` and `code_challenge_method` pair from
    /// an authorization request.
    pub fn parse(challenge: impl Into<String>, method: &str) -> Result<Self, PkceError> {
        if method != "S256" {
            return Err(PkceError::UnsupportedMethod(method.to_string()));
        }
        let challenge = challenge.into();
        if URL_SAFE_NO_PAD.decode(&challenge).is_err() {
            return Err(PkceError::InvalidChallengeFormat);
        }
        Ok(Self(challenge))
    }

    /// Computes the S256 challenge for a verifier.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(verifier.0.as_bytes());
        Self(URL_SAFE_NO_PAD.encode(hasher.finalize()))
    }

    /// Verifies that a verifier hashes to this challenge.
    pub fn verify(&self, verifier: &PkceVerifier) -> Result<(), PkceError> {
        if Self::from_verifier(verifier).0 == self.0 {
            Ok(())
        } else {
            Err(PkceError::VerificationFailed)
        }
    }

    /// The challenge as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the challenge and returns the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}
