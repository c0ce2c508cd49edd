//! DPoP proof validation (RFC 9449).
//!
//! A DPoP proof is a JWT signed with the client's ephemeral key, carried in
//! the `DPoP` header. The proof binds the request method and URL, carries a
//! fresh `jti`, and embeds the public key in its header. Tokens issued
//! against a proof carry `cnf.jkt`, the RFC 7638 thumbprint of that key.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use oxidp_core::clock::Clock;
use oxidp_store::DpopJtiStore;

use crate::AuthResult;
use crate::error::AuthError;

/// Algorithms accepted in DPoP proofs.
const ALLOWED_ALGS: &[Algorithm] = &[Algorithm::ES256, Algorithm::RS256, Algorithm::EdDSA];

/// A validated DPoP proof.
#[derive(Debug, Clone)]
pub struct DpopProof {
    /// RFC 7638 thumbprint of the proof key; becomes `cnf.jkt`.
    pub jkt: String,

    /// The proof's jti, already recorded in the replay barrier.
    pub jti: String,
}

#[derive(Debug, Deserialize)]
struct DpopClaims {
    jti: String,
    htm: String,
    htu: String,
    iat: i64,
}

/// Validates DPoP proofs against the replay barrier and freshness window.
pub struct DpopValidator {
    jti_store: Arc<DpopJtiStore>,
    clock: Arc<dyn Clock>,
    window_secs: u64,
}

impl DpopValidator {
    /// Creates a validator with the given `iat` acceptance window.
    #[must_use]
    pub fn new(jti_store: Arc<DpopJtiStore>, clock: Arc<dyn Clock>, window_secs: u64) -> Self {
        Self {
            jti_store,
            clock,
            window_secs,
        }
    }

    /// Validates a proof presented for `method` on `url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDpopProof` for structural, signature, binding,
    /// freshness, and replay failures.
    pub async fn validate(&self, proof: &str, method: &str, url: &str) -> AuthResult<DpopProof> {
        let header = decode_header(proof)
            .map_err(|e| AuthError::invalid_dpop_proof(format!("unparseable proof: {e}")))?;

        if header.typ.as_deref() != Some("dpop+jwt") {
            return Err(AuthError::invalid_dpop_proof("typ must be dpop+jwt"));
        }
        if !ALLOWED_ALGS.contains(&header.alg) {
            return Err(AuthError::invalid_dpop_proof(format!(
                "unsupported proof algorithm {:?}",
                header.alg
            )));
        }
        let jwk = header
            .jwk
            .ok_or_else(|| AuthError::invalid_dpop_proof("proof header missing jwk"))?;

        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| AuthError::invalid_dpop_proof(format!("invalid proof key: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = decode::<DpopClaims>(proof, &key, &validation)
            .map_err(|e| AuthError::invalid_dpop_proof(format!("signature check failed: {e}")))?
            .claims;

        if !claims.htm.eq_ignore_ascii_case(method) {
            return Err(AuthError::invalid_dpop_proof("htm does not match request"));
        }
        if !htu_matches(&claims.htu, url) {
            return Err(AuthError::invalid_dpop_proof("htu does not match request"));
        }

        let now_secs = (self.clock.now_ms() / 1_000) as i64;
        if (now_secs - claims.iat).unsigned_abs() > self.window_secs {
            return Err(AuthError::invalid_dpop_proof("proof iat outside window"));
        }

        let ttl_ms = self.window_secs.saturating_mul(2_000);
        if !self.jti_store.seen(&claims.jti, ttl_ms).await {
            return Err(AuthError::invalid_dpop_proof("proof jti replayed"));
        }

        Ok(DpopProof {
            jkt: jwk_thumbprint(&jwk)?,
            jti: claims.jti,
        })
    }
}

/// `htu` comparison: scheme, host, port, and path, ignoring query and
/// fragment, per RFC 9449 §4.3.
fn htu_matches(htu: &str, request_url: &str) -> bool {
    let normalize = |raw: &str| -> Option<(String, String, Option<u16>, String)> {
        let mut parsed = Url::parse(raw).ok()?;
        parsed.set_query(None);
        parsed.set_fragment(None);
        Some((
            parsed.scheme().to_string(),
            parsed.host_str()?.to_ascii_lowercase(),
            parsed.port(),
            parsed.path().to_string(),
        ))
    };
    match (normalize(htu), normalize(request_url)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// RFC 7638 JWK thumbprint: SHA-256 over the canonical JSON of the key's
/// required members, base64url encoded.
pub fn jwk_thumbprint(jwk: &Jwk) -> AuthResult<String> {
    let canonical = match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, rsa.e, rsa.n)
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let crv = curve_name(&ec.curve)?;
            format!(
                r#"{{"crv":"{crv}","kty":"EC","x":"{}","y":"{}"}}"#,
                ec.x, ec.y
            )
        }
        AlgorithmParameters::OctetKeyPair(okp) => {
            let crv = curve_name(&okp.curve)?;
            format!(r#"{{"crv":"{crv}","kty":"OKP","x":"{}"}}"#, okp.x)
        }
        AlgorithmParameters::OctetKey(_) => {
            return Err(AuthError::invalid_dpop_proof(
                "symmetric keys are not valid proof keys",
            ));
        }
    };

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(hasher.finalize()))
}

fn curve_name<T: serde::Serialize>(curve: &T) -> AuthResult<String> {
    match serde_json::to_value(curve) {
        Ok(serde_json::Value::String(name)) => Ok(name),
        _ => Err(AuthError::invalid_dpop_proof("unknown proof key curve")),
    }
}
