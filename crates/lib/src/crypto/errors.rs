//! Error types for the crypto boundary
use thiserror::Error;

use crate::types::{OrganizationId, RecordKind, UserId};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The session handle is unknown, stale, or belongs to a locked user.
    #[error("No live crypto session for user '{user_id}'")]
    InvalidSession { user_id: UserId },

    #[error("Key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    #[error("Encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    #[error("Decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    #[error("Invalid key format: {reason}")]
    InvalidKeyFormat { reason: String },

    #[error("Organization crypto not initialized for organization '{organization_id}'")]
    MissingOrganizationKey { organization_id: OrganizationId },

    #[error("Expected a {expected} record, got a {actual}")]
    KindMismatch {
        expected: RecordKind,
        actual: RecordKind,
    },
}

impl CryptoError {
    /// Check if this error means there is no usable session, as opposed to a bad key.
    pub fn is_invalid_session(&self) -> bool {
        matches!(self, CryptoError::InvalidSession { .. })
    }

    /// Check if this error came from opening ciphertext.
    pub fn is_decryption_error(&self) -> bool {
        matches!(
            self,
            CryptoError::DecryptionFailed { .. } | CryptoError::MissingOrganizationKey { .. }
        )
    }

    /// Check if this error came from deriving or unwrapping key material.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            CryptoError::KeyDerivationFailed { .. } | CryptoError::InvalidKeyFormat { .. }
        )
    }
}

impl From<CryptoError> for crate::Error {
    fn from(err: CryptoError) -> Self {
        crate::Error::Crypto(err)
    }
}
