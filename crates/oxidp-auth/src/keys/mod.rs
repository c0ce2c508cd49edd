//! Per-tenant signing keys: generation, rotation, JWKS publication.
//!
//! Each tenant holds one `active` and one `next` key per algorithm.
//! Rotation retires the active key, promotes `next`, and generates a fresh
//! `next`, all under the tenant's shard lock. Retired keys stay in the
//! published JWKS for a grace period so tokens signed just before rotation
//! keep verifying.
//!
//! Key material is immutable once generated, so signing never takes the
//! shard lock for longer than an `Arc` clone; only rotation serializes.

mod manager;
mod material;

pub use manager::KeyManager;
pub use material::{Jwk, Jwks, SigningAlgorithm, SigningKey};
