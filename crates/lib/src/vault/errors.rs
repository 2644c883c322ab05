//! Error types for the vault coordinator

use thiserror::Error;

use crate::types::UserId;

/// The operation needs a user or a session that is not there.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No active user")]
    NoActiveUser,

    #[error("Vault for user '{user_id}' is locked")]
    VaultLocked { user_id: UserId },

    /// Unlock-and-sync targets the active user only.
    #[error("User '{user_id}' is not the active user")]
    NotActiveUser { user_id: UserId },

    /// Master-password unlock needs a protected user key from a previous sync.
    #[error("No protected user key stored for user '{user_id}'")]
    MissingUserKey { user_id: UserId },
}

impl SessionError {
    pub fn is_locked(&self) -> bool {
        matches!(self, SessionError::VaultLocked { .. })
    }

    pub fn is_no_active_user(&self) -> bool {
        matches!(self, SessionError::NoActiveUser)
    }
}

impl From<SessionError> for crate::Error {
    fn from(err: SessionError) -> Self {
        crate::Error::Session(err)
    }
}
