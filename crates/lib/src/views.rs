//! Decrypted (plaintext) views of vault records.
//!
//! Views never touch the record store. They are produced by the crypto
//! boundary from [`EncryptedRecord`](crate::types::EncryptedRecord)s and held
//! in memory only for as long as an observer is looking at them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{OrganizationId, RecordId, RecordKind};

/// A decrypted login credential.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialView {
    pub id: Option<RecordId>,
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub folder_id: Option<RecordId>,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub collection_ids: Vec<RecordId>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub revision_date: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderView {
    pub id: Option<RecordId>,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionView {
    pub id: Option<RecordId>,
    pub organization_id: Option<OrganizationId>,
    pub name: String,
}

/// A decrypted "send": a shareable, expiring piece of text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendView {
    pub id: Option<RecordId>,
    pub name: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub max_access_count: Option<u32>,
    #[serde(default)]
    pub access_count: u32,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub deletion_date: Option<DateTime<Utc>>,
}

/// Any plaintext view, tagged by kind.
///
/// This is the currency of the crypto boundary: it decrypts records into
/// `PlaintextView`s and encrypts `PlaintextView`s into records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "view", rename_all = "lowercase")]
pub enum PlaintextView {
    Credential(CredentialView),
    Folder(FolderView),
    Collection(CollectionView),
    Send(SendView),
}

impl PlaintextView {
    pub fn kind(&self) -> RecordKind {
        match self {
            PlaintextView::Credential(_) => RecordKind::Credential,
            PlaintextView::Folder(_) => RecordKind::Folder,
            PlaintextView::Collection(_) => RecordKind::Collection,
            PlaintextView::Send(_) => RecordKind::Send,
        }
    }

    pub fn id(&self) -> Option<&RecordId> {
        match self {
            PlaintextView::Credential(v) => v.id.as_ref(),
            PlaintextView::Folder(v) => v.id.as_ref(),
            PlaintextView::Collection(v) => v.id.as_ref(),
            PlaintextView::Send(v) => v.id.as_ref(),
        }
    }

    /// Overwrite the view's id. The record id is authoritative over whatever id
    /// was sealed inside the payload.
    pub fn set_id(&mut self, id: RecordId) {
        match self {
            PlaintextView::Credential(v) => v.id = Some(id),
            PlaintextView::Folder(v) => v.id = Some(id),
            PlaintextView::Collection(v) => v.id = Some(id),
            PlaintextView::Send(v) => v.id = Some(id),
        }
    }

    pub fn organization_id(&self) -> Option<&OrganizationId> {
        match self {
            PlaintextView::Credential(v) => v.organization_id.as_ref(),
            PlaintextView::Collection(v) => v.organization_id.as_ref(),
            PlaintextView::Folder(_) | PlaintextView::Send(_) => None,
        }
    }
}

/// A plaintext view type bound to one [`RecordKind`].
///
/// Lets the decryption pipelines and mutations stay generic over the kind
/// they handle.
pub trait VaultView: Clone + std::fmt::Debug + PartialEq + Send + Sync + 'static {
    const KIND: RecordKind;

    fn id(&self) -> Option<&RecordId>;

    fn set_id(&mut self, id: RecordId);

    fn into_plaintext(self) -> PlaintextView;

    /// Returns `None` when `view` is of a different kind.
    fn from_plaintext(view: PlaintextView) -> Option<Self>;
}

macro_rules! vault_view {
    ($view:ident, $variant:ident) => {
        impl VaultView for $view {
            const KIND: RecordKind = RecordKind::$variant;

            fn id(&self) -> Option<&RecordId> {
                self.id.as_ref()
            }

            fn set_id(&mut self, id: RecordId) {
                self.id = Some(id);
            }

            fn into_plaintext(self) -> PlaintextView {
                PlaintextView::$variant(self)
            }

            fn from_plaintext(view: PlaintextView) -> Option<Self> {
                match view {
                    PlaintextView::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

vault_view!(CredentialView, Credential);
vault_view!(FolderView, Folder);
vault_view!(CollectionView, Collection);
vault_view!(SendView, Send);

/// The merged, consistency-checked vault: credentials, folders and collections.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VaultSnapshot {
    pub credentials: Vec<CredentialView>,
    pub folders: Vec<FolderView>,
    pub collections: Vec<CollectionView>,
}

impl VaultSnapshot {
    pub fn credential(&self, id: &RecordId) -> Option<&CredentialView> {
        self.credentials.iter().find(|c| c.id.as_ref() == Some(id))
    }

    pub fn folder(&self, id: &RecordId) -> Option<&FolderView> {
        self.folders.iter().find(|f| f.id.as_ref() == Some(id))
    }

    pub fn collection(&self, id: &RecordId) -> Option<&CollectionView> {
        self.collections.iter().find(|c| c.id.as_ref() == Some(id))
    }
}

/// Sends are kept apart from [`VaultSnapshot`]: they belong to no folder or collection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendCollection {
    pub sends: Vec<SendView>,
}

impl SendCollection {
    pub fn send(&self, id: &RecordId) -> Option<&SendView> {
        self.sends.iter().find(|s| s.id.as_ref() == Some(id))
    }
}
