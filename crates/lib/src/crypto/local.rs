//! Local crypto engine
//!
//! A self-contained [`CryptoBoundary`] built from:
//! - Argon2id to derive a master key from the master password
//! - AES-256-GCM to seal the user key, organization keys and record payloads
//!
//! Every sealed value is `base64(nonce || ciphertext)`. The user key is a
//! random 32-byte key sealed with the master key (or with an auth-request
//! key); organization keys are sealed with the user key.

use std::{
    collections::HashMap,
    fmt,
    sync::Mutex,
};

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, AeadCore, OsRng},
};
use argon2::Argon2;
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use chrono::Utc;
use rand::RngCore;
use tracing::{debug, trace};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{CryptoBoundary, CryptoError, SessionHandle, UnlockMethod};
use crate::{
    Result,
    types::{AccountKeys, EncryptedRecord, OrganizationId, RecordId, RecordKind, UserId},
    views::PlaintextView,
};

/// Nonce length for AES-GCM (12 bytes standard)
pub const NONCE_LENGTH: usize = 12;

/// Key length for AES-256 (32 bytes)
pub const KEY_LENGTH: usize = 32;

/// Shortest salt Argon2 accepts
pub const MIN_SALT_LENGTH: usize = 8;

/// A 32-byte symmetric key, zeroized on drop.
pub type SymmetricKey = Zeroizing<[u8; KEY_LENGTH]>;

/// Generate a random symmetric key.
pub fn generate_key() -> SymmetricKey {
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    rand::thread_rng().fill_bytes(key.as_mut_slice());
    key
}

/// Derive the master key from a password and salt using Argon2id.
pub fn derive_master_key(password: impl AsRef<str>, salt: impl AsRef<str>) -> Result<SymmetricKey> {
    let salt = salt.as_ref();
    if salt.len() < MIN_SALT_LENGTH {
        return Err(CryptoError::KeyDerivationFailed {
            reason: format!(
                "salt too short: expected at least {MIN_SALT_LENGTH} bytes, got {}",
                salt.len()
            ),
        }
        .into());
    }

    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    Argon2::default()
        .hash_password_into(password.as_ref().as_bytes(), salt.as_bytes(), key.as_mut_slice())
        .map_err(|e| CryptoError::KeyDerivationFailed {
            reason: e.to_string(),
        })?;
    Ok(key)
}

/// Seal `plaintext` with `key`.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<String> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::EncryptionFailed {
            reason: format!("Failed to create cipher: {e}"),
        })?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed {
            reason: e.to_string(),
        })?;

    let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(Base64::encode_string(&sealed))
}

/// Open a value produced by [`seal`].
pub fn open(key: &[u8], sealed: &str) -> Result<Zeroizing<Vec<u8>>> {
    let bytes = Base64::decode_vec(sealed).map_err(|e| CryptoError::DecryptionFailed {
        reason: format!("Invalid encoding: {e}"),
    })?;
    if bytes.len() <= NONCE_LENGTH {
        return Err(CryptoError::DecryptionFailed {
            reason: format!("Sealed value too short: {} bytes", bytes.len()),
        }
        .into());
    }

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::DecryptionFailed {
            reason: format!("Failed to create cipher: {e}"),
        })?;
    let (nonce, ciphertext) = bytes.split_at(NONCE_LENGTH);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed {
            reason: "authentication failed".to_string(),
        })?;
    Ok(Zeroizing::new(plaintext))
}

/// Seal one key with another.
pub fn protect_key(wrapping_key: &[u8], key: &SymmetricKey) -> Result<String> {
    seal(wrapping_key, key.as_slice())
}

fn unprotect_key(wrapping_key: &[u8], protected: &str) -> Result<SymmetricKey> {
    let bytes = open(wrapping_key, protected)?;
    let array: [u8; KEY_LENGTH] =
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyFormat {
                reason: format!("expected {KEY_LENGTH} bytes, got {}", bytes.len()),
            })?;
    Ok(Zeroizing::new(array))
}

/// Key material for a freshly provisioned account.
pub struct ProvisionedAccount {
    /// The plaintext user key. Hosts normally drop it right away.
    pub user_key: SymmetricKey,
    /// What gets stored and sent to the server.
    pub keys: AccountKeys,
}

/// Create a new user key and seal it under the master password.
pub fn provision_account(
    password: impl AsRef<str>,
    kdf_salt: impl AsRef<str>,
) -> Result<ProvisionedAccount> {
    let master_key = derive_master_key(password, kdf_salt)?;
    let user_key = generate_key();
    let keys = AccountKeys {
        protected_user_key: Some(protect_key(master_key.as_slice(), &user_key)?),
        ..Default::default()
    };
    Ok(ProvisionedAccount { user_key, keys })
}

/// One user's open session.
struct LocalSession {
    token: Uuid,
    user_key: SymmetricKey,
    org_keys: HashMap<OrganizationId, SymmetricKey>,
}

impl LocalSession {
    fn key_for(&self, organization_id: Option<&OrganizationId>) -> Result<&[u8]> {
        match organization_id {
            None => Ok(self.user_key.as_slice()),
            Some(org) => self
                .org_keys
                .get(org)
                .map(|k| k.as_slice())
                .ok_or_else(|| {
                    CryptoError::MissingOrganizationKey {
                        organization_id: org.clone(),
                    }
                    .into()
                }),
        }
    }
}

/// In-process [`CryptoBoundary`] holding decrypted keys for unlocked users.
///
/// All key material is zeroized when a session ends or the engine is dropped.
#[derive(Default)]
pub struct LocalCryptoEngine {
    sessions: Mutex<HashMap<UserId, LocalSession>>,
}

impl fmt::Debug for LocalCryptoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sessions = self.sessions.lock().unwrap();
        f.debug_struct("LocalCryptoEngine")
            .field("sessions", &format!("<{} live sessions>", sessions.len()))
            .finish()
    }
}

impl LocalCryptoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `user_id` currently has a live session.
    pub fn has_session(&self, user_id: &UserId) -> bool {
        self.sessions.lock().unwrap().contains_key(user_id)
    }

    fn with_session<R>(
        &self,
        handle: &SessionHandle,
        f: impl FnOnce(&LocalSession) -> Result<R>,
    ) -> Result<R> {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(handle.user_id()) {
            Some(session) if session.token == handle.token() => f(session),
            _ => Err(CryptoError::InvalidSession {
                user_id: handle.user_id().clone(),
            }
            .into()),
        }
    }

    async fn unlocking_key(method: &UnlockMethod, stored_keys: &AccountKeys) -> Result<SymmetricKey> {
        match method {
            UnlockMethod::MasterPassword { password, kdf_salt } => {
                let protected = stored_keys.protected_user_key.as_deref().ok_or_else(|| {
                    CryptoError::InvalidKeyFormat {
                        reason: "no protected user key stored".to_string(),
                    }
                })?;
                let password = password.clone();
                let kdf_salt = kdf_salt.clone();
                // Argon2 is deliberately slow; keep it off the async workers
                let master_key =
                    tokio::task::spawn_blocking(move || derive_master_key(password.as_str(), kdf_salt))
                        .await
                        .map_err(|e| CryptoError::KeyDerivationFailed {
                            reason: e.to_string(),
                        })??;
                unprotect_key(master_key.as_slice(), protected)
            }
            UnlockMethod::AuthRequest {
                request_key,
                protected_user_key,
            } => unprotect_key(request_key.as_slice(), protected_user_key),
        }
    }
}

#[async_trait]
impl CryptoBoundary for LocalCryptoEngine {
    async fn init_session(
        &self,
        user_id: &UserId,
        method: &UnlockMethod,
        stored_keys: &AccountKeys,
    ) -> Result<SessionHandle> {
        let user_key = Self::unlocking_key(method, stored_keys).await?;
        let handle = SessionHandle::new(user_id.clone());

        let session = LocalSession {
            token: handle.token(),
            user_key,
            org_keys: HashMap::new(),
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(user_id.clone(), session);

        debug!(user_id = %user_id, method = method.name(), "Opened crypto session");
        Ok(handle)
    }

    async fn init_org_crypto(
        &self,
        user_id: &UserId,
        org_keys: &HashMap<OrganizationId, String>,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(user_id)
            .ok_or_else(|| CryptoError::InvalidSession {
                user_id: user_id.clone(),
            })?;

        let mut opened = HashMap::with_capacity(org_keys.len());
        for (org, protected) in org_keys {
            opened.insert(org.clone(), unprotect_key(session.user_key.as_slice(), protected)?);
        }
        session.org_keys.extend(opened);

        debug!(user_id = %user_id, organizations = org_keys.len(), "Initialized organization crypto");
        Ok(())
    }

    async fn decrypt(
        &self,
        session: &SessionHandle,
        kind: RecordKind,
        records: &[EncryptedRecord],
    ) -> Result<Vec<PlaintextView>> {
        self.with_session(session, |s| {
            records
                .iter()
                .map(|record| {
                    if record.kind != kind {
                        return Err(CryptoError::KindMismatch {
                            expected: kind,
                            actual: record.kind,
                        }
                        .into());
                    }
                    let key = s.key_for(record.organization_id.as_ref())?;
                    let plaintext = open(key, &record.payload)?;
                    let mut view: PlaintextView =
                        serde_json::from_slice(&plaintext).map_err(|e| {
                            CryptoError::DecryptionFailed {
                                reason: format!("Malformed payload in record '{}': {e}", record.id),
                            }
                        })?;
                    if view.kind() != kind {
                        return Err(CryptoError::KindMismatch {
                            expected: kind,
                            actual: view.kind(),
                        }
                        .into());
                    }
                    view.set_id(record.id.clone());
                    Ok(view)
                })
                .collect::<Result<Vec<_>>>()
        })
        .inspect(|views| trace!(%kind, count = views.len(), "Decrypted records"))
    }

    async fn encrypt(
        &self,
        session: &SessionHandle,
        kind: RecordKind,
        view: &PlaintextView,
    ) -> Result<EncryptedRecord> {
        if view.kind() != kind {
            return Err(CryptoError::KindMismatch {
                expected: kind,
                actual: view.kind(),
            }
            .into());
        }

        let plaintext = Zeroizing::new(serde_json::to_vec(view)?);
        let organization_id = view.organization_id().cloned();
        let payload = self.with_session(session, |s| {
            let key = s.key_for(organization_id.as_ref())?;
            seal(key, plaintext.as_slice())
        })?;

        Ok(EncryptedRecord {
            id: view
                .id()
                .cloned()
                .unwrap_or_else(|| RecordId::new(Uuid::new_v4().to_string())),
            user_id: session.user_id().clone(),
            kind,
            organization_id,
            payload,
            revision_date: Utc::now(),
        })
    }

    async fn end_session(&self, user_id: &UserId) {
        if self.sessions.lock().unwrap().remove(user_id).is_some() {
            debug!(user_id = %user_id, "Ended crypto session");
        }
    }
}
