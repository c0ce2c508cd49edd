//! Opaque pagination cursors for admin listings.
//!
//! A cursor encodes the `(created_at, id)` position of the last row a page
//! returned. Ordering by the pair keeps pagination stable when timestamps
//! tie. The encoding is base64url over a compact JSON object; clients treat
//! it as opaque.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::clock::UnixMillis;

/// Errors produced when decoding a cursor received from a client.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    /// The cursor is not valid base64url.
    #[error("cursor is not valid base64url")]
    InvalidEncoding,

    /// The decoded payload is not a cursor.
    #[error("cursor payload is malformed")]
    InvalidPayload,
}

/// Pagination position: the `(created_at, id)` of the last returned row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Row identifier; tiebreaker for identical timestamps.
    pub id: String,

    /// Row creation time in epoch milliseconds.
    pub created_at: UnixMillis,
}

impl Cursor {
    /// Creates a cursor from a row position.
    #[must_use]
    pub fn new(id: impl Into<String>, created_at: UnixMillis) -> Self {
        Self {
            id: id.into(),
            created_at,
        }
    }

    /// Encodes the cursor as an opaque base64url string.
    #[must_use]
    pub fn encode(&self) -> String {
        // Serialization of this struct cannot fail.
        let json = serde_json::to_vec(self).expect("cursor serialization");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decodes a cursor received from a client.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError`] if the input is not base64url or does not
    /// decode to a cursor payload. Unknown fields are rejected so a cursor
    /// can never smuggle extra keys into downstream processing.
    pub fn decode(encoded: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CursorError::InvalidEncoding)?;

        let mut de = serde_json::Deserializer::from_slice(&bytes);
        let cursor = CursorStrict::deserialize(&mut de).map_err(|_| CursorError::InvalidPayload)?;
        de.end().map_err(|_| CursorError::InvalidPayload)?;
        Ok(Self {
            id: cursor.id,
            created_at: cursor.created_at,
        })
    }
}

/// Deny-unknown-fields twin used only for decoding.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CursorStrict {
    id: String,
    created_at: UnixMillis,
}
