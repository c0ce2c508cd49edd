//! Directory error types.

use oxidp_storage::StorageError;

/// Errors that can occur in the directory layer.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The user does not exist.
    #[error("user not found: {user_id}")]
    UserNotFound {
        /// The missing user id.
        user_id: String,
    },

    /// A user with this identifier already exists.
    #[error("user already exists: {user_id}")]
    UserExists {
        /// The conflicting user id.
        user_id: String,
    },

    /// The resolved partition is not registered.
    #[error("unknown partition: {partition}")]
    UnknownPartition {
        /// The unregistered partition name.
        partition: String,
    },

    /// The PII write failed; the user stays `pending`/`failed` for retry.
    #[error("PII write failed for {user_id}: {message}")]
    PiiWriteFailed {
        /// The affected user.
        user_id: String,
        /// Description of the failure.
        message: String,
    },

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DirectoryError {
    /// Returns `true` if retrying the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::PiiWriteFailed { .. } => true,
            _ => false,
        }
    }
}
