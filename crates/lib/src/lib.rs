//!
//! vaultsync: keeps an encrypted credential vault consistent across a local
//! record store, a remote server and an in-memory decrypted view.
//!
//! ## Core Concepts
//!
//! * **DataState (`state::DataState`)**: Freshness-tagged wrapper around every published value, with a merge operator.
//! * **RecordStore (`store::RecordStore`)**: Per-user durable store of encrypted records with change notification.
//! * **CryptoBoundary (`crypto::CryptoBoundary`)**: Opaque capability that opens per-user sessions and decrypts/encrypts records.
//! * **RemoteApi (`remote::RemoteApi`)**: Full sync and single-record writes against the server.
//! * **VaultCoordinator (`vault::VaultCoordinator`)**: Owns lock state, the single-flight sync flag,
//!   the subscription-gated decryption pipelines and the merged vault view.
//!
//! ## Example
//!
//! ```
//! # use std::sync::Arc;
//! # use vaultsync::{VaultConfig, VaultCoordinator, UserId, crypto::LocalCryptoEngine,
//! #     store::InMemoryRecordStore, remote::OfflineRemote};
//! # #[tokio::main]
//! # async fn main() {
//! let vault = VaultCoordinator::new(
//!     Arc::new(InMemoryRecordStore::new()),
//!     Arc::new(LocalCryptoEngine::new()),
//!     Arc::new(OfflineRemote),
//!     VaultConfig::default(),
//! );
//! vault.set_active_user(Some(UserId::new("alice")));
//! let snapshot = vault.vault_snapshot_stream();
//! assert!(snapshot.current().is_loading());
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod crypto;
pub mod observe;
pub mod remote;
pub mod state;
pub mod store;
pub mod types;
pub mod vault;
pub mod views;

pub use config::VaultConfig;
pub use state::{DataState, StateKind};
pub use types::{EncryptedRecord, OrganizationId, RecordId, RecordKind, UserId};
pub use vault::{SyncOutcome, VaultCoordinator};

/// Result type used throughout the vaultsync library.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure classes callers can branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No network reachable. Surfaces as `DataState::NoNetwork`.
    Connectivity,
    /// Server reachable but rejected the request or sent an invalid payload.
    RemoteRejection,
    /// Key derivation, encryption or decryption failed.
    Crypto,
    /// No active user, or no crypto session for the user.
    InvalidSessionState,
    /// The local record store failed.
    Storage,
}

/// Common error type for the vaultsync library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured record store errors from the store module
    #[error(transparent)]
    Store(store::StoreError),

    /// Structured crypto errors from the crypto module
    #[error(transparent)]
    Crypto(crypto::CryptoError),

    /// Structured remote API errors from the remote module
    #[error(transparent)]
    Remote(remote::RemoteError),

    /// Structured session-state errors from the vault module
    #[error(transparent)]
    Session(vault::SessionError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Store(_) => "store",
            Error::Crypto(_) => "crypto",
            Error::Remote(_) => "remote",
            Error::Session(_) => "vault",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Classify this error into the failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Remote(e) if e.is_connectivity() => FailureKind::Connectivity,
            Error::Remote(_) => FailureKind::RemoteRejection,
            Error::Crypto(e) if e.is_invalid_session() => FailureKind::InvalidSessionState,
            Error::Crypto(_) => FailureKind::Crypto,
            Error::Session(_) => FailureKind::InvalidSessionState,
            Error::Store(_) | Error::Io(_) | Error::Serialize(_) => FailureKind::Storage,
        }
    }

    /// Check if this error means the network could not be reached.
    pub fn is_connectivity_error(&self) -> bool {
        self.failure_kind() == FailureKind::Connectivity
    }

    /// Check if this error was a rejection by a reachable server.
    pub fn is_remote_rejection(&self) -> bool {
        self.failure_kind() == FailureKind::RemoteRejection
    }

    /// Check if this error is a key derivation, encryption or decryption failure.
    pub fn is_crypto_error(&self) -> bool {
        self.failure_kind() == FailureKind::Crypto
    }

    /// Check if this error means "not logged in" or "vault locked" rather than "wrong key".
    pub fn is_invalid_session_state(&self) -> bool {
        self.failure_kind() == FailureKind::InvalidSessionState
    }

    /// Check if this error came from local storage.
    pub fn is_storage_error(&self) -> bool {
        self.failure_kind() == FailureKind::Storage
    }
}
