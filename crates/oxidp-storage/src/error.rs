//! Storage error types.

/// Errors that can occur during storage operations.
///
/// The protocol layer maps these onto the OAuth error taxonomy: transient
/// errors become `temporarily_unavailable`, conflicts surface as retries or
/// `invalid_grant` depending on the caller.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend cannot be reached or refused the connection.
    #[error("Storage unavailable: {message}")]
    Unavailable {
        /// Description of the connectivity failure.
        message: String,
    },

    /// A concurrent writer invalidated this operation (unique violation,
    /// optimistic version mismatch, serialization failure).
    #[error("Storage conflict: {message}")]
    Conflict {
        /// Description of the conflicting operation.
        message: String,
    },

    /// The per-call deadline expired before the backend answered.
    #[error("Storage timeout after {deadline_ms} ms")]
    Timeout {
        /// The deadline that expired, in milliseconds.
        deadline_ms: u64,
    },

    /// A statement or its parameters were malformed.
    #[error("Invalid statement: {message}")]
    InvalidStatement {
        /// Description of the statement error.
        message: String,
    },

    /// A row could not be decoded into the expected shape.
    #[error("Row decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// An internal backend error occurred.
    #[error("Internal storage error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(deadline_ms: u64) -> Self {
        Self::Timeout { deadline_ms }
    }

    /// Creates a new `InvalidStatement` error.
    #[must_use]
    pub fn invalid_statement(message: impl Into<String>) -> Self {
        Self::InvalidStatement {
            message: message.into(),
        }
    }

    /// Creates a new `Decode` error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the identical operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }

    /// Returns `true` if a concurrent writer caused this failure.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::unavailable("connection refused");
        assert_eq!(err.to_string(), "Storage unavailable: connection refused");

        let err = StorageError::timeout(2000);
        assert_eq!(err.to_string(), "Storage timeout after 2000 ms");
    }

    #[test]
    fn test_transience() {
        assert!(StorageError::unavailable("down").is_transient());
        assert!(StorageError::timeout(2000).is_transient());
        assert!(!StorageError::conflict("dup key").is_transient());
        assert!(StorageError::conflict("dup key").is_conflict());
        assert!(!StorageError::internal("bug").is_transient());
    }
}
