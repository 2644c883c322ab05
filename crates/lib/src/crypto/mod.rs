//! Crypto boundary
//!
//! The coordinator never touches key material directly. It asks a
//! [`CryptoBoundary`] to open a per-user session and then hands that
//! session's [`SessionHandle`] back for every decrypt or encrypt.

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    Result,
    types::{AccountKeys, EncryptedRecord, OrganizationId, RecordKind, UserId},
    views::PlaintextView,
};

pub mod errors;
pub mod local;

pub use errors::CryptoError;
pub use local::LocalCryptoEngine;

/// How a user proves they may open their vault.
pub enum UnlockMethod {
    /// Derive the unlocking key from the master password.
    ///
    /// The protected user key is read from the user's stored [`AccountKeys`].
    MasterPassword {
        password: Zeroizing<String>,
        kdf_salt: String,
    },

    /// An approved login request from another device supplies the unlocking key.
    AuthRequest {
        request_key: Zeroizing<Vec<u8>>,
        protected_user_key: String,
    },
}

impl UnlockMethod {
    pub fn master_password(password: impl Into<String>, kdf_salt: impl Into<String>) -> Self {
        UnlockMethod::MasterPassword {
            password: Zeroizing::new(password.into()),
            kdf_salt: kdf_salt.into(),
        }
    }

    pub fn auth_request(request_key: Vec<u8>, protected_user_key: impl Into<String>) -> Self {
        UnlockMethod::AuthRequest {
            request_key: Zeroizing::new(request_key),
            protected_user_key: protected_user_key.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UnlockMethod::MasterPassword { .. } => "master_password",
            UnlockMethod::AuthRequest { .. } => "auth_request",
        }
    }
}

// Secrets stay out of logs
impl fmt::Debug for UnlockMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnlockMethod::MasterPassword { kdf_salt, .. } => f
                .debug_struct("MasterPassword")
                .field("kdf_salt", kdf_salt)
                .finish_non_exhaustive(),
            UnlockMethod::AuthRequest { .. } => {
                f.debug_struct("AuthRequest").finish_non_exhaustive()
            }
        }
    }
}

/// Opaque handle to one user's live crypto session.
///
/// A handle outlives nothing: once the session is ended every use of the
/// handle fails with [`CryptoError::InvalidSession`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    user_id: UserId,
    token: Uuid,
}

impl SessionHandle {
    /// Mint a fresh handle for `user_id`.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            token: Uuid::new_v4(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn token(&self) -> Uuid {
        self.token
    }
}

/// Opaque cryptographic capability consumed by the coordinator.
#[async_trait]
pub trait CryptoBoundary: Send + Sync {
    /// Open a session for `user_id`, replacing any existing one.
    async fn init_session(
        &self,
        user_id: &UserId,
        method: &UnlockMethod,
        stored_keys: &AccountKeys,
    ) -> Result<SessionHandle>;

    /// Make organization keys usable inside the user's live session.
    async fn init_org_crypto(
        &self,
        user_id: &UserId,
        org_keys: &HashMap<OrganizationId, String>,
    ) -> Result<()>;

    /// Decrypt a batch of records of one kind.
    async fn decrypt(
        &self,
        session: &SessionHandle,
        kind: RecordKind,
        records: &[EncryptedRecord],
    ) -> Result<Vec<PlaintextView>>;

    /// Encrypt one plaintext view of `kind`.
    async fn encrypt(
        &self,
        session: &SessionHandle,
        kind: RecordKind,
        view: &PlaintextView,
    ) -> Result<EncryptedRecord>;

    /// Tear down the user's session. Ending a missing session is a no-op.
    async fn end_session(&self, user_id: &UserId);
}
