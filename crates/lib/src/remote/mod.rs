//! Remote API boundary
//!
//! The coordinator talks to the server through [`RemoteApi`]: one full sync
//! endpoint and single-record writes. Transport failures that mean "no
//! network" must surface as [`RemoteError::Unreachable`] so they can be shown
//! as `NoNetwork` instead of an error.

use async_trait::async_trait;

use crate::{
    Result,
    types::{EncryptedRecord, RecordId, RecordKind, ServerSnapshot, UserId},
};

pub mod errors;
#[cfg(feature = "http")]
pub mod http;

pub use errors::RemoteError;
#[cfg(feature = "http")]
pub use http::HttpRemoteApi;

#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetch the user's complete vault and key material.
    async fn full_sync(&self, user_id: &UserId) -> Result<ServerSnapshot>;

    /// Create a record. Returns the record as the server stored it.
    async fn create_record(
        &self,
        user_id: &UserId,
        kind: RecordKind,
        record: &EncryptedRecord,
    ) -> Result<EncryptedRecord>;

    /// Replace the record `id`. Returns the record as the server stored it.
    async fn update_record(
        &self,
        user_id: &UserId,
        kind: RecordKind,
        id: &RecordId,
        record: &EncryptedRecord,
    ) -> Result<EncryptedRecord>;
}

/// A remote that is never reachable.
///
/// For hosts running without a server; every call fails with
/// [`RemoteError::Unreachable`].
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineRemote;

impl OfflineRemote {
    fn unreachable<T>() -> Result<T> {
        Err(RemoteError::Unreachable {
            reason: "running offline".to_string(),
        }
        .into())
    }
}

#[async_trait]
impl RemoteApi for OfflineRemote {
    async fn full_sync(&self, _user_id: &UserId) -> Result<ServerSnapshot> {
        Self::unreachable()
    }

    async fn create_record(
        &self,
        _user_id: &UserId,
        _kind: RecordKind,
        _record: &EncryptedRecord,
    ) -> Result<EncryptedRecord> {
        Self::unreachable()
    }

    async fn update_record(
        &self,
        _user_id: &UserId,
        _kind: RecordKind,
        _id: &RecordId,
        _record: &EncryptedRecord,
    ) -> Result<EncryptedRecord> {
        Self::unreachable()
    }
}
