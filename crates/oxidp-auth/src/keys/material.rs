//! Signing key material and JWK export.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::pkcs8::EncodePrivateKey as EdEncodePrivateKey;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p256::SecretKey as EcSecretKey;
use p256::ecdsa::SigningKey as EcSigningKey;
use p256::pkcs8::EncodePrivateKey as EcEncodePrivateKey;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey as RsaEncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use oxidp_core::clock::UnixMillis;

use crate::error::AuthError;

// =============================================================================
// Signing Algorithm
// =============================================================================

/// Signing algorithms the key manager provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSA with SHA-256 (2048-bit keys).
    RS256,
    /// ECDSA over P-256.
    ES256,
    /// Ed25519.
    EdDSA,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` algorithm.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::ES256 => Algorithm::ES256,
            Self::EdDSA => Algorithm::EdDSA,
        }
    }

    /// The JWS `alg` header value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::ES256 => "ES256",
            Self::EdDSA => "EdDSA",
        }
    }

    /// Parses a JWS `alg` value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RS256" => Some(Self::RS256),
            "ES256" => Some(Self::ES256),
            "EdDSA" => Some(Self::EdDSA),
            _ => None,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// JWKS Types
// =============================================================================

/// JSON Web Key Set, as published at `/.well-known/jwks.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// A published JSON Web Key (public half only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type: `RSA`, `EC`, or `OKP`.
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use; always `sig`.
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// Curve name, for EC and OKP keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// X coordinate (EC) or public key bytes (OKP).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// Y coordinate (EC only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// =============================================================================
// Signing Key
// =============================================================================

/// One generated signing key. Immutable after construction.
pub struct SigningKey {
    /// Key ID carried in JWS headers.
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    /// When the key was generated, epoch milliseconds.
    pub created_at: UnixMillis,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public: PublicKeyData,
}

enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
    Okp { x: Vec<u8> },
}

impl SigningKey {
    /// Generates a fresh key for `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if key generation or PEM encoding fails.
    pub fn generate(algorithm: SigningAlgorithm, now: UnixMillis) -> Result<Self, AuthError> {
        match algorithm {
            SigningAlgorithm::RS256 => Self::generate_rsa(now),
            SigningAlgorithm::ES256 => Self::generate_ec(now),
            SigningAlgorithm::EdDSA => Self::generate_ed25519(now),
        }
    }

    fn generate_rsa(now: UnixMillis) -> Result<Self, AuthError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| AuthError::internal(format!("RSA key generation failed: {e}")))?;
        let public_key = private_key.to_public_key();
        let n = public_key.n().to_bytes_be();
        let e = public_key.e().to_bytes_be();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::internal(format!("RSA PEM export failed: {e}")))?;
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| AuthError::internal(format!("RSA key import failed: {e}")))?;

        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::internal(format!("RSA public PEM export failed: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| AuthError::internal(format!("RSA public key import failed: {e}")))?;

        Ok(Self {
            kid: Uuid::new_v4().to_string(),
            algorithm: SigningAlgorithm::RS256,
            created_at: now,
            encoding_key,
            decoding_key,
            public: PublicKeyData::Rsa { n, e },
        })
    }

    fn generate_ec(now: UnixMillis) -> Result<Self, AuthError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let signing_key = EcSigningKey::from(&secret_key);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| AuthError::internal("EC point missing x coordinate"))?
            .to_vec();
        let y = point
            .y()
            .ok_or_else(|| AuthError::internal("EC point missing y coordinate"))?
            .to_vec();

        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::internal(format!("EC PEM export failed: {e}")))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| AuthError::internal(format!("EC key import failed: {e}")))?;

        let x_b64 = URL_SAFE_NO_PAD.encode(&x);
        let y_b64 = URL_SAFE_NO_PAD.encode(&y);
        let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64)
            .map_err(|e| AuthError::internal(format!("EC public key import failed: {e}")))?;

        Ok(Self {
            kid: Uuid::new_v4().to_string(),
            algorithm: SigningAlgorithm::ES256,
            created_at: now,
            encoding_key,
            decoding_key,
            public: PublicKeyData::Ec { x, y },
        })
    }

    fn generate_ed25519(now: UnixMillis) -> Result<Self, AuthError> {
        let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
        let x = signing_key.verifying_key().to_bytes().to_vec();

        let private_pem = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::internal(format!("Ed25519 PEM export failed: {e}")))?;
        let encoding_key = EncodingKey::from_ed_pem(private_pem.as_bytes())
            .map_err(|e| AuthError::internal(format!("Ed25519 key import failed: {e}")))?;

        let x_b64 = URL_SAFE_NO_PAD.encode(&x);
        let decoding_key = DecodingKey::from_ed_components(&x_b64)
            .map_err(|e| AuthError::internal(format!("Ed25519 public key import failed: {e}")))?;

        Ok(Self {
            kid: Uuid::new_v4().to_string(),
            algorithm: SigningAlgorithm::EdDSA,
            created_at: now,
            encoding_key,
            decoding_key,
            public: PublicKeyData::Okp { x },
        })
    }

    /// The private encoding key for JWS signing.
    #[must_use]
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// The public decoding key for JWS verification.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Exports the public half as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        let base = Jwk {
            kty: String::new(),
            kid: self.kid.clone(),
            use_: "sig".to_string(),
            alg: self.algorithm.as_str().to_string(),
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
        };
        match &self.public {
            PublicKeyData::Rsa { n, e } => Jwk {
                kty: "RSA".to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                ..base
            },
            PublicKeyData::Ec { x, y } => Jwk {
                kty: "EC".to_string(),
                crv: Some("P-256".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
                ..base
            },
            PublicKeyData::Okp { x } => Jwk {
                kty: "OKP".to_string(),
                crv: Some("Ed25519".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                ..base
            },
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Header, Validation, decode, encode};
    use serde_json::json;

    fn roundtrip(algorithm: SigningAlgorithm) {
        let key = SigningKey::generate(algorithm, 0).unwrap();

        let mut header = Header::new(algorithm.to_jwt_algorithm());
        header.kid = Some(key.kid.clone());
        let token = encode(
            &header,
            &json!({"sub": "user-1", "exp": 4_102_444_800i64}),
            key.encoding_key(),
        )
        .unwrap();

        let mut validation = Validation::new(algorithm.to_jwt_algorithm());
        validation.validate_aud = false;
        let decoded =
            decode::<serde_json::Value>(&token, key.decoding_key(), &validation).unwrap();
        assert_eq!(decoded.claims["sub"], "user-1");
    }

    #[test]
    fn test_es256_sign_verify() {
        roundtrip(SigningAlgorithm::ES256);
    }

    #[test]
    fn test_eddsa_sign_verify() {
        roundtrip(SigningAlgorithm::EdDSA);
    }

    #[test]
    fn test_rs256_sign_verify() {
        roundtrip(SigningAlgorithm::RS256);
    }

    #[test]
    fn test_jwk_export_shapes() {
        let ec = SigningKey::generate(SigningAlgorithm::ES256, 0).unwrap().to_jwk();
        assert_eq!(ec.kty, "EC");
        assert_eq!(ec.crv.as_deref(), Some("P-256"));
        assert!(ec.x.is_some() && ec.y.is_some() && ec.n.is_none());

        let okp = SigningKey::generate(SigningAlgorithm::EdDSA, 0).unwrap().to_jwk();
        assert_eq!(okp.kty, "OKP");
        assert_eq!(okp.crv.as_deref(), Some("Ed25519"));
        assert!(okp.x.is_some() && okp.y.is_none());

        let rsa = SigningKey::generate(SigningAlgorithm::RS256, 0).unwrap().to_jwk();
        assert_eq!(rsa.kty, "RSA");
        assert!(rsa.n.is_some() && rsa.e.is_some() && rsa.crv.is_none());
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!(SigningAlgorithm::parse("ES256"), Some(SigningAlgorithm::ES256));
        assert_eq!(SigningAlgorithm::parse("EdDSA"), Some(SigningAlgorithm::EdDSA));
        assert_eq!(SigningAlgorithm::parse("HS256"), None);
    }
}
