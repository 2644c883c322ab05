//! Encrypted record store boundary.
//!
//! The store holds ciphertext only. It is the single owner of
//! [`EncryptedRecord`]s and is mutated exclusively through the operations on
//! [`RecordStore`]: bulk replace (sync), single upsert (confirmed mutation)
//! and delete-all (logout). Readers subscribe per user and per kind and are
//! notified on every write.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    Result,
    types::{AccountKeys, EncryptedRecord, RecordKind, ServerSnapshot, UserId},
};

pub mod errors;
mod in_memory;

pub use errors::StoreError;
pub use in_memory::InMemoryRecordStore;

/// An immutable list of records as published to subscribers.
pub type RecordList = Arc<Vec<EncryptedRecord>>;

/// Subscription to one user's records of one kind.
///
/// The current value is always the full list; every write to that user and
/// kind publishes a new list.
pub type RecordWatch = watch::Receiver<RecordList>;

/// Per-user durable storage of encrypted records and key material.
///
/// All implementations must be `Send` and `Sync` so one store can be shared by
/// the coordinator, its pipelines and its sync orchestrator.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Subscribe to the records of `kind` held for `user_id`.
    ///
    /// Subscribing to a user with no records yields an empty list that will
    /// be updated as soon as records are written.
    fn subscribe(&self, user_id: &UserId, kind: RecordKind) -> Result<RecordWatch>;

    /// Current records of `kind` held for `user_id`.
    async fn records(&self, user_id: &UserId, kind: RecordKind) -> Result<Vec<EncryptedRecord>>;

    /// Atomically replace every record held for `user_id` with the snapshot's records.
    ///
    /// Key material in the snapshot is not touched; use
    /// [`merge_account_keys`](Self::merge_account_keys) for that.
    async fn replace_all(&self, user_id: &UserId, snapshot: &ServerSnapshot) -> Result<()>;

    /// Insert `record`, or replace the stored record with the same id.
    async fn upsert(&self, user_id: &UserId, kind: RecordKind, record: EncryptedRecord)
    -> Result<()>;

    /// Delete every record and all key material held for `user_id`.
    async fn delete_all(&self, user_id: &UserId) -> Result<()>;

    /// Key material stored for `user_id` (empty if none).
    async fn account_keys(&self, user_id: &UserId) -> Result<AccountKeys>;

    /// Merge `keys` into the stored key material. Returns true if anything changed.
    async fn merge_account_keys(&self, user_id: &UserId, keys: AccountKeys) -> Result<bool>;
}
