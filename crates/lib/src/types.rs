//! Core identifiers and encrypted record types.
//!
//! Everything in this module is ciphertext or metadata. Plaintext lives in
//! [`crate::views`] and is only ever produced through a live crypto session.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Stable account identifier. All per-user state is keyed by it.
    UserId
);
string_id!(
    /// Server-assigned identifier of a single vault record.
    RecordId
);
string_id!(
    /// Identifier of an organization that owns shared records.
    OrganizationId
);

/// The four kinds of record the vault keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Credential,
    Folder,
    Collection,
    Send,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Credential,
        RecordKind::Folder,
        RecordKind::Collection,
        RecordKind::Send,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Credential => "credential",
            RecordKind::Folder => "folder",
            RecordKind::Collection => "collection",
            RecordKind::Send => "send",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An encrypted vault record as held by the record store.
///
/// `payload` is opaque to everything except the crypto boundary that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub id: RecordId,
    pub user_id: UserId,
    pub kind: RecordKind,
    /// Records owned by an organization are sealed with that organization's key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,
    pub payload: String,
    pub revision_date: DateTime<Utc>,
}

/// Durable per-user key material.
///
/// Every key is stored in protected (encrypted) form; only the crypto boundary
/// can open them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountKeys {
    /// The user's symmetric vault key, sealed with a password- or
    /// auth-request-derived key.
    #[serde(default)]
    pub protected_user_key: Option<String>,

    /// The user's private key, sealed with the user key.
    #[serde(default)]
    pub private_key: Option<String>,

    /// Organization id → organization key sealed with the user key.
    #[serde(default)]
    pub organization_keys: HashMap<OrganizationId, String>,
}

impl AccountKeys {
    /// Merge `newer` into `self`.
    ///
    /// Present values in `newer` win; absent values keep what is stored.
    /// Organization keys are unioned with `newer` taking precedence.
    ///
    /// Returns true if anything changed.
    pub fn merge(&mut self, newer: AccountKeys) -> bool {
        let mut changed = false;
        if let Some(key) = newer.protected_user_key
            && self.protected_user_key.as_ref() != Some(&key)
        {
            self.protected_user_key = Some(key);
            changed = true;
        }
        if let Some(key) = newer.private_key
            && self.private_key.as_ref() != Some(&key)
        {
            self.private_key = Some(key);
            changed = true;
        }
        for (org, key) in newer.organization_keys {
            if self.organization_keys.get(&org) != Some(&key) {
                self.organization_keys.insert(org, key);
                changed = true;
            }
        }
        changed
    }

    pub fn is_empty(&self) -> bool {
        self.protected_user_key.is_none()
            && self.private_key.is_none()
            && self.organization_keys.is_empty()
    }
}

/// Full vault contents as returned by the remote full-sync endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    #[serde(default)]
    pub keys: AccountKeys,
    #[serde(default)]
    pub credentials: Vec<EncryptedRecord>,
    #[serde(default)]
    pub folders: Vec<EncryptedRecord>,
    #[serde(default)]
    pub collections: Vec<EncryptedRecord>,
    #[serde(default)]
    pub sends: Vec<EncryptedRecord>,
}

impl ServerSnapshot {
    pub fn records(&self, kind: RecordKind) -> &[EncryptedRecord] {
        match kind {
            RecordKind::Credential => &self.credentials,
            RecordKind::Folder => &self.folders,
            RecordKind::Collection => &self.collections,
            RecordKind::Send => &self.sends,
        }
    }

    pub fn into_records(self, kind: RecordKind) -> Vec<EncryptedRecord> {
        match kind {
            RecordKind::Credential => self.credentials,
            RecordKind::Folder => self.folders,
            RecordKind::Collection => self.collections,
            RecordKind::Send => self.sends,
        }
    }

    pub fn has_organization_keys(&self) -> bool {
        !self.keys.organization_keys.is_empty()
    }
}
