//! Error types for record store operations.

use thiserror::Error;

use crate::types::{RecordKind, UserId};

/// Errors raised by a [`RecordStore`](super::RecordStore) implementation.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record was handed to the store under the wrong user.
    #[error("Record '{record_id}' belongs to user '{actual}', not '{expected}'")]
    UserMismatch {
        record_id: String,
        expected: UserId,
        actual: UserId,
    },

    /// A record was handed to the store under the wrong kind.
    #[error("Record '{record_id}' is a {actual}, expected a {expected}")]
    KindMismatch {
        record_id: String,
        expected: RecordKind,
        actual: RecordKind,
    },

    /// Persisted store data could not be read back.
    #[error("Data corruption detected in record store: {reason}")]
    DataCorruption { reason: String },

    /// Implementation-specific error from a store backend
    #[error("Record store implementation error: {reason}")]
    ImplementationError { reason: String },
}

impl StoreError {
    /// Check if this error is a user or kind mismatch on write
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            StoreError::UserMismatch { .. } | StoreError::KindMismatch { .. }
        )
    }

    /// Check if this error is related to data integrity
    pub fn is_integrity_error(&self) -> bool {
        matches!(self, StoreError::DataCorruption { .. })
    }

    /// Check if this error is implementation-specific
    pub fn is_implementation_error(&self) -> bool {
        matches!(self, StoreError::ImplementationError { .. })
    }
}

// Conversion from StoreError to the main Error type
impl From<StoreError> for crate::Error {
    fn from(err: StoreError) -> Self {
        crate::Error::Store(err)
    }
}
