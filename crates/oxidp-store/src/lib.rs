//! # oxidp-store
//!
//! Sharded single-writer state stores for the oxidp authorization server.
//!
//! Every token, code, session, challenge, and rate counter in the system is
//! mutable state that must observe single-writer semantics: no lost updates,
//! atomic consume, exactly-once rotation. This crate gets there by sharding
//! each namespace by key and pinning every shard's state behind its own
//! mutex, so all writes to a shard serialize through one logical writer.
//!
//! ## Guarantees
//!
//! - Within a shard: strict serial order; reads observe prior writes.
//! - Across shards: no ordering. Every operation that needs atomicity is
//!   phrased to touch exactly one shard.
//! - `consume` operations are a single compare-and-set under the shard lock:
//!   two concurrent consumes of the same key produce exactly one success.
//!
//! ## Stores
//!
//! | Store | Keyed by | Single-writer operation |
//! |---|---|---|
//! | [`SessionStore`] | session id | touch / revoke |
//! | [`AuthCodeStore`] | code digest | atomic consume (+ PKCE, DPoP) |
//! | [`RefreshTokenRotator`] | family id | rotate tip, reuse detection |
//! | [`ChallengeStore`] | `{kind}:{session_key}` | CAS consume |
//! | [`RateLimiter`] | caller key | fixed-window increment |
//! | [`ParRequestStore`] | request URI | client-bound consume |
//! | [`DpopJtiStore`] | proof jti | first-use barrier |
//! | [`RevocationStore`] | jti / family id | idempotent revoke |
//! | [`DeviceCodeStore`] | device code digest | interval-gated poll |
//! | [`CibaRequestStore`] | auth_req_id | interval-gated poll |
//! | [`FlowStateStore`] | flow id | staged /authorize state |
//! | [`SetupTokenStore`] | fixed keys | at-most-once setup token |

mod challenge;
mod ciba;
mod code;
mod device;
mod dpop;
mod error;
mod flow;
mod par;
mod rate_limit;
mod refresh;
mod revocation;
mod session;
mod setup;
mod shard;

pub use challenge::{ChallengeRecord, ChallengeStore};
pub use ciba::{CibaPoll, CibaRequest, CibaRequestStore};
pub use code::{AuthCodeRecord, AuthCodeStore, ConsumeRequest};
pub use device::{
    DEFAULT_DEVICE_TTL_MS, DEFAULT_POLL_INTERVAL_MS, DeviceAuthorization, DeviceCodeRecord,
    DeviceCodeStore, DevicePoll, DeviceStatus,
};
pub use dpop::DpopJtiStore;
pub use error::StoreError;
pub use flow::{FlowStage, FlowState, FlowStateStore, MAX_FLOW_TTL_MS};
pub use par::{MAX_PAR_TTL_MS, ParRequest, ParRequestStore};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use refresh::{RefreshClaims, RefreshMint, RefreshRotation, RefreshTokenRotator};
pub use revocation::RevocationStore;
pub use session::{SessionAttrs, SessionRecord, SessionStore};
pub use setup::{DEFAULT_SETUP_TTL_MS, SetupTokenStore};
pub use shard::Sharded;

/// Type alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;
