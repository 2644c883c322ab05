//! In-memory record store implementation
//!
//! Suitable for tests, development, or hosts that persist the whole store
//! themselves via [`InMemoryRecordStore::save_to_file`] and
//! [`InMemoryRecordStore::load_from_file`].

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use super::{RecordList, RecordStore, RecordWatch, StoreError};
use crate::{
    Result,
    types::{AccountKeys, EncryptedRecord, RecordKind, ServerSnapshot, UserId},
};

/// Everything held for one user.
#[derive(Debug, Default)]
struct UserRecords {
    /// One channel per kind; the channel's current value is the stored list.
    channels: HashMap<RecordKind, watch::Sender<RecordList>>,
    keys: AccountKeys,
}

impl UserRecords {
    fn channel(&mut self, kind: RecordKind) -> &watch::Sender<RecordList> {
        self.channels
            .entry(kind)
            .or_insert_with(|| watch::Sender::new(Arc::new(Vec::new())))
    }

    fn current(&self, kind: RecordKind) -> Vec<EncryptedRecord> {
        self.channels
            .get(&kind)
            .map(|tx| tx.borrow().as_ref().clone())
            .unwrap_or_default()
    }
}

/// A record store keeping everything in a `HashMap`.
///
/// Change notification is done with one `tokio::sync::watch` channel per
/// user and kind. Channels survive `delete_all`, so subscribers observe the
/// store emptying rather than going silent.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    users: RwLock<HashMap<UserId, UserRecords>>,
}

/// On-disk form of the store.
#[derive(Serialize, Deserialize, Default)]
struct SerializableStore {
    users: HashMap<UserId, SerializableUser>,
}

#[derive(Serialize, Deserialize, Default)]
struct SerializableUser {
    records: BTreeMap<RecordKind, Vec<EncryptedRecord>>,
    #[serde(default)]
    keys: AccountKeys,
}

fn check_record(user_id: &UserId, kind: RecordKind, record: &EncryptedRecord) -> Result<()> {
    if &record.user_id != user_id {
        return Err(StoreError::UserMismatch {
            record_id: record.id.to_string(),
            expected: user_id.clone(),
            actual: record.user_id.clone(),
        }
        .into());
    }
    if record.kind != kind {
        return Err(StoreError::KindMismatch {
            record_id: record.id.to_string(),
            expected: kind,
            actual: record.kind,
        }
        .into());
    }
    Ok(())
}

impl InMemoryRecordStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every user with anything stored.
    pub fn user_ids(&self) -> Vec<UserId> {
        let users = self.users.read().unwrap();
        users.keys().cloned().collect()
    }

    /// Saves all records and key material to `path` as JSON.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serializable = {
            let users = self.users.read().unwrap();
            SerializableStore {
                users: users
                    .iter()
                    .map(|(user_id, user)| {
                        let records = RecordKind::ALL
                            .into_iter()
                            .map(|kind| (kind, user.current(kind)))
                            .filter(|(_, records)| !records.is_empty())
                            .collect();
                        let user = SerializableUser {
                            records,
                            keys: user.keys.clone(),
                        };
                        (user_id.clone(), user)
                    })
                    .collect(),
            }
        };

        let json = serde_json::to_string_pretty(&serializable)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Loads a store previously written by [`save_to_file`](Self::save_to_file).
    ///
    /// A missing file yields an empty store.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }

        let json = std::fs::read_to_string(path)?;
        let serializable: SerializableStore =
            serde_json::from_str(&json).map_err(|e| StoreError::DataCorruption {
                reason: format!("{}: {e}", path.display()),
            })?;

        let mut users = HashMap::with_capacity(serializable.users.len());
        for (user_id, stored) in serializable.users {
            let mut user = UserRecords {
                keys: stored.keys,
                ..Default::default()
            };
            for (kind, records) in stored.records {
                for record in &records {
                    check_record(&user_id, kind, record)?;
                }
                user.channel(kind).send_replace(Arc::new(records));
            }
            users.insert(user_id, user);
        }

        Ok(Self {
            users: RwLock::new(users),
        })
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn subscribe(&self, user_id: &UserId, kind: RecordKind) -> Result<RecordWatch> {
        let mut users = self.users.write().unwrap();
        let user = users.entry(user_id.clone()).or_default();
        Ok(user.channel(kind).subscribe())
    }

    async fn records(&self, user_id: &UserId, kind: RecordKind) -> Result<Vec<EncryptedRecord>> {
        let users = self.users.read().unwrap();
        Ok(users
            .get(user_id)
            .map(|user| user.current(kind))
            .unwrap_or_default())
    }

    async fn replace_all(&self, user_id: &UserId, snapshot: &ServerSnapshot) -> Result<()> {
        for kind in RecordKind::ALL {
            for record in snapshot.records(kind) {
                check_record(user_id, kind, record)?;
            }
        }

        let mut users = self.users.write().unwrap();
        let user = users.entry(user_id.clone()).or_default();
        for kind in RecordKind::ALL {
            let records = snapshot.records(kind).to_vec();
            user.channel(kind).send_replace(Arc::new(records));
        }
        debug!(
            user_id = %user_id,
            credentials = snapshot.credentials.len(),
            folders = snapshot.folders.len(),
            collections = snapshot.collections.len(),
            sends = snapshot.sends.len(),
            "Replaced all records"
        );
        Ok(())
    }

    async fn upsert(
        &self,
        user_id: &UserId,
        kind: RecordKind,
        record: EncryptedRecord,
    ) -> Result<()> {
        check_record(user_id, kind, &record)?;

        let mut users = self.users.write().unwrap();
        let user = users.entry(user_id.clone()).or_default();
        user.channel(kind).send_modify(|list| {
            let list = Arc::make_mut(list);
            match list.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => list.push(record),
            }
        });
        Ok(())
    }

    async fn delete_all(&self, user_id: &UserId) -> Result<()> {
        let mut users = self.users.write().unwrap();
        if let Some(user) = users.get_mut(user_id) {
            for tx in user.channels.values() {
                tx.send_replace(Arc::new(Vec::new()));
            }
            user.keys = AccountKeys::default();
        }
        debug!(user_id = %user_id, "Deleted all records");
        Ok(())
    }

    async fn account_keys(&self, user_id: &UserId) -> Result<AccountKeys> {
        let users = self.users.read().unwrap();
        Ok(users
            .get(user_id)
            .map(|user| user.keys.clone())
            .unwrap_or_default())
    }

    async fn merge_account_keys(&self, user_id: &UserId, keys: AccountKeys) -> Result<bool> {
        let mut users = self.users.write().unwrap();
        let user = users.entry(user_id.clone()).or_default();
        Ok(user.keys.merge(keys))
    }
}
