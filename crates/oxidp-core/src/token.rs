//! Opaque token, code, and user-code generation.
//!
//! All secrets come from the OS random number generator and are encoded as
//! unpadded base64url. Stored lookups never see plaintext material: callers
//! hash with [`sha256_hex`] before persisting, mirroring password storage.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Alphabet for device-flow user codes.
///
/// Excludes the ambiguous characters 0/O, 1/I and all vowels so the codes
/// cannot spell anything a user would have to read out loud twice.
const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ23456789";

/// Fills `buf` from the OS random number generator.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Generates `n_bytes` of OS randomness encoded as unpadded base64url.
#[must_use]
pub fn generate_token(n_bytes: usize) -> String {
    let mut bytes = vec![0u8; n_bytes];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates an authorization code.
///
/// 96 random bytes encode to 128 base64url characters, the minimum code
/// length accepted on the wire.
#[must_use]
pub fn generate_auth_code() -> String {
    generate_token(96)
}

/// Generates an opaque refresh token handle (256 bits).
#[must_use]
pub fn generate_refresh_handle() -> String {
    generate_token(32)
}

/// Generates a device-flow user code: 8 characters from the unambiguous
/// alphabet with a dash after position 4, e.g. `WDJB-MJHT`.
#[must_use]
pub fn generate_user_code() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);

    let mut code = String::with_capacity(9);
    for (i, b) in bytes.iter().enumerate() {
        if i == 4 {
            code.push('-');
        }
        code.push(USER_CODE_ALPHABET[*b as usize % USER_CODE_ALPHABET.len()] as char);
    }
    code
}

/// SHA-256 digest of `input`, hex encoded.
///
/// Used for stored lookups of codes, refresh handles, and challenge secrets.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 digest of `input`, unpadded base64url encoded.
#[must_use]
pub fn sha256_b64url(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Left half of the SHA-256 digest of `input`, unpadded base64url encoded.
///
/// This is the `c_hash` / `at_hash` construction from OIDC Core 3.3.2.11 for
/// SHA-256-based signing algorithms.
#[must_use]
pub fn half_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

/// First 8 bytes of the SHA-256 digest of `key`, as a big-endian u64.
///
/// Shard routing uses this value modulo the shard count.
#[must_use]
pub fn shard_hash(key: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
