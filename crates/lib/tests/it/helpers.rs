#![allow(dead_code)]

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use vaultsync::{
    DataState, EncryptedRecord, Error, OrganizationId, RecordId, RecordKind, Result, UserId,
    VaultConfig, VaultCoordinator,
    crypto::{
        CryptoBoundary, CryptoError, LocalCryptoEngine, SessionHandle, UnlockMethod,
        local::{SymmetricKey, generate_key, protect_key, seal},
    },
    remote::{RemoteApi, RemoteError},
    store::{InMemoryRecordStore, RecordStore},
    types::{AccountKeys, ServerSnapshot},
    views::{CollectionView, CredentialView, FolderView, PlaintextView, SendView},
};

// Re-export tokio test macro for convenience
pub use tokio;

/// Grace period used by test coordinators. Short so teardown tests stay fast.
pub const GRACE: Duration = Duration::from_millis(50);

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Await `fut`, failing the test if it takes longer than [`WAIT`].
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting")
}

// ==========================
// ACCOUNTS
// ==========================

/// A test account whose keys the test holds in plaintext, so it can seal
/// records exactly as the local crypto engine would.
pub struct Account {
    pub user_id: UserId,
    pub user_key: SymmetricKey,
    pub request_key: SymmetricKey,
    pub keys: AccountKeys,
    pub org_keys: HashMap<OrganizationId, SymmetricKey>,
}

impl Account {
    pub fn new(name: &str) -> Self {
        let user_key = generate_key();
        let request_key = generate_key();
        let keys = AccountKeys {
            protected_user_key: Some(protect_key(request_key.as_slice(), &user_key).unwrap()),
            ..Default::default()
        };
        Self {
            user_id: UserId::new(name),
            user_key,
            request_key,
            keys,
            org_keys: HashMap::new(),
        }
    }

    /// Unlock through an approved auth request; avoids Argon2 in most tests.
    pub fn unlock_method(&self) -> UnlockMethod {
        UnlockMethod::auth_request(
            self.request_key.to_vec(),
            self.keys.protected_user_key.clone().unwrap(),
        )
    }

    /// Add an organization and its protected key to this account's keys.
    pub fn join_organization(&mut self, org: &str) -> OrganizationId {
        let org_id = OrganizationId::new(org);
        let org_key = generate_key();
        self.keys.organization_keys.insert(
            org_id.clone(),
            protect_key(self.user_key.as_slice(), &org_key).unwrap(),
        );
        self.org_keys.insert(org_id.clone(), org_key);
        org_id
    }

    /// Seal `view` into a record with id `id`.
    pub fn record(&self, id: &str, mut view: PlaintextView) -> EncryptedRecord {
        view.set_id(RecordId::new(id));
        let organization_id = view.organization_id().cloned();
        let key: &[u8] = match &organization_id {
            Some(org) => self.org_keys[org].as_slice(),
            None => self.user_key.as_slice(),
        };
        EncryptedRecord {
            id: RecordId::new(id),
            user_id: self.user_id.clone(),
            kind: view.kind(),
            organization_id,
            payload: seal(key, &serde_json::to_vec(&view).unwrap()).unwrap(),
            revision_date: Utc::now(),
        }
    }

    pub fn credential(&self, id: &str, name: &str) -> EncryptedRecord {
        self.record(
            id,
            PlaintextView::Credential(CredentialView {
                name: name.to_string(),
                username: Some(format!("{}@example.com", self.user_id)),
                password: Some("hunter2".to_string()),
                ..Default::default()
            }),
        )
    }

    pub fn org_credential(&self, id: &str, name: &str, org: &OrganizationId) -> EncryptedRecord {
        self.record(
            id,
            PlaintextView::Credential(CredentialView {
                name: name.to_string(),
                organization_id: Some(org.clone()),
                ..Default::default()
            }),
        )
    }

    pub fn folder(&self, id: &str, name: &str) -> EncryptedRecord {
        self.record(
            id,
            PlaintextView::Folder(FolderView {
                id: None,
                name: name.to_string(),
            }),
        )
    }

    pub fn collection(&self, id: &str, name: &str, org: &OrganizationId) -> EncryptedRecord {
        self.record(
            id,
            PlaintextView::Collection(CollectionView {
                id: None,
                organization_id: Some(org.clone()),
                name: name.to_string(),
            }),
        )
    }

    pub fn send(&self, id: &str, name: &str) -> EncryptedRecord {
        self.record(
            id,
            PlaintextView::Send(SendView {
                name: name.to_string(),
                text: Some("shared text".to_string()),
                ..Default::default()
            }),
        )
    }

    /// A server snapshot holding this account's keys and the given records.
    pub fn snapshot(&self, records: Vec<EncryptedRecord>) -> ServerSnapshot {
        let mut snapshot = ServerSnapshot {
            keys: self.keys.clone(),
            ..Default::default()
        };
        for record in records {
            match record.kind {
                RecordKind::Credential => snapshot.credentials.push(record),
                RecordKind::Folder => snapshot.folders.push(record),
                RecordKind::Collection => snapshot.collections.push(record),
                RecordKind::Send => snapshot.sends.push(record),
            }
        }
        snapshot
    }
}

// ==========================
// REMOTE
// ==========================

#[derive(Clone, Copy, Debug)]
pub enum Failure {
    Offline,
    Reject(u16),
}

impl Failure {
    fn error(self) -> Error {
        match self {
            Failure::Offline => RemoteError::Unreachable {
                reason: "network down".to_string(),
            }
            .into(),
            Failure::Reject(status) => RemoteError::Rejected {
                status,
                message: "rejected by test server".to_string(),
            }
            .into(),
        }
    }
}

/// Scriptable in-process server.
#[derive(Default)]
pub struct MockRemote {
    snapshots: Mutex<HashMap<UserId, ServerSnapshot>>,
    sync_failure: Mutex<Option<Failure>>,
    write_failure: Mutex<Option<Failure>>,
    hold: Mutex<Option<Arc<Notify>>>,
    sync_started: Notify,
    full_sync_calls: AtomicUsize,
    writes: Mutex<Vec<EncryptedRecord>>,
}

impl MockRemote {
    pub fn set_snapshot(&self, user_id: &UserId, snapshot: ServerSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(user_id.clone(), snapshot);
    }

    pub fn fail_syncs(&self, failure: Option<Failure>) {
        *self.sync_failure.lock().unwrap() = failure;
    }

    pub fn fail_writes(&self, failure: Option<Failure>) {
        *self.write_failure.lock().unwrap() = failure;
    }

    /// Make every full sync wait until the returned gate is notified.
    pub fn hold_syncs(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.hold.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Wait until a full sync request has reached the server.
    pub async fn sync_started(&self) {
        within(self.sync_started.notified()).await
    }

    pub fn full_sync_calls(&self) -> usize {
        self.full_sync_calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<EncryptedRecord> {
        self.writes.lock().unwrap().clone()
    }

    fn confirm(&self, record: &EncryptedRecord) -> Result<EncryptedRecord> {
        if let Some(failure) = *self.write_failure.lock().unwrap() {
            return Err(failure.error());
        }
        let mut confirmed = record.clone();
        confirmed.revision_date = Utc::now();
        self.writes.lock().unwrap().push(confirmed.clone());
        Ok(confirmed)
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn full_sync(&self, user_id: &UserId) -> Result<ServerSnapshot> {
        self.full_sync_calls.fetch_add(1, Ordering::SeqCst);
        self.sync_started.notify_one();

        let hold = self.hold.lock().unwrap().clone();
        if let Some(gate) = hold {
            gate.notified().await;
        }

        if let Some(failure) = *self.sync_failure.lock().unwrap() {
            return Err(failure.error());
        }
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_record(
        &self,
        _user_id: &UserId,
        _kind: RecordKind,
        record: &EncryptedRecord,
    ) -> Result<EncryptedRecord> {
        self.confirm(record)
    }

    async fn update_record(
        &self,
        _user_id: &UserId,
        _kind: RecordKind,
        id: &RecordId,
        record: &EncryptedRecord,
    ) -> Result<EncryptedRecord> {
        assert_eq!(&record.id, id, "update must carry the record id");
        self.confirm(record)
    }
}

// ==========================
// CRYPTO
// ==========================

/// Local crypto engine with injectable faults and pauses.
#[derive(Default)]
pub struct FlakyCrypto {
    engine: LocalCryptoEngine,
    fail_send_decrypt: AtomicBool,
    fail_org_crypto: AtomicBool,
    hold_unlock: Mutex<Option<Arc<Notify>>>,
    unlock_started: Notify,
    hold_decrypt: Mutex<Option<Arc<Notify>>>,
    decrypt_finished: Notify,
    decrypt_calls: AtomicUsize,
}

impl FlakyCrypto {
    pub fn fail_send_decrypt(&self, fail: bool) {
        self.fail_send_decrypt.store(fail, Ordering::SeqCst);
    }

    pub fn fail_org_crypto(&self, fail: bool) {
        self.fail_org_crypto.store(fail, Ordering::SeqCst);
    }

    /// Make every session init wait until the returned gate is notified.
    pub fn hold_unlocks(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.hold_unlock.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub async fn unlock_started(&self) {
        within(self.unlock_started.notified()).await
    }

    /// Make every decrypt hold its result until the returned gate is notified.
    pub fn hold_decrypts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.hold_decrypt.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Wait until a held decrypt has its result ready.
    pub async fn decrypt_finished(&self) {
        within(self.decrypt_finished.notified()).await
    }

    pub fn has_session(&self, user_id: &UserId) -> bool {
        self.engine.has_session(user_id)
    }

    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CryptoBoundary for FlakyCrypto {
    async fn init_session(
        &self,
        user_id: &UserId,
        method: &UnlockMethod,
        stored_keys: &AccountKeys,
    ) -> Result<SessionHandle> {
        self.unlock_started.notify_one();
        let hold = self.hold_unlock.lock().unwrap().clone();
        if let Some(gate) = hold {
            gate.notified().await;
        }
        self.engine.init_session(user_id, method, stored_keys).await
    }

    async fn init_org_crypto(
        &self,
        user_id: &UserId,
        org_keys: &HashMap<OrganizationId, String>,
    ) -> Result<()> {
        if self.fail_org_crypto.load(Ordering::SeqCst) {
            return Err(CryptoError::InvalidKeyFormat {
                reason: "injected org crypto failure".to_string(),
            }
            .into());
        }
        self.engine.init_org_crypto(user_id, org_keys).await
    }

    async fn decrypt(
        &self,
        session: &SessionHandle,
        kind: RecordKind,
        records: &[EncryptedRecord],
    ) -> Result<Vec<vaultsync::views::PlaintextView>> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if kind == RecordKind::Send && self.fail_send_decrypt.load(Ordering::SeqCst) {
            return Err(CryptoError::DecryptionFailed {
                reason: "injected send decrypt failure".to_string(),
            }
            .into());
        }
        let result = self.engine.decrypt(session, kind, records).await;
        let hold = self.hold_decrypt.lock().unwrap().take();
        if let Some(gate) = hold {
            self.decrypt_finished.notify_one();
            gate.notified().await;
        }
        result
    }

    async fn encrypt(
        &self,
        session: &SessionHandle,
        kind: RecordKind,
        view: &PlaintextView,
    ) -> Result<EncryptedRecord> {
        self.engine.encrypt(session, kind, view).await
    }

    async fn end_session(&self, user_id: &UserId) {
        self.engine.end_session(user_id).await
    }
}

// ==========================
// COORDINATOR
// ==========================

/// A coordinator plus direct handles to its collaborators.
pub struct TestVault {
    pub vault: VaultCoordinator,
    pub store: Arc<InMemoryRecordStore>,
    pub crypto: Arc<FlakyCrypto>,
    pub remote: Arc<MockRemote>,
}

pub fn test_vault() -> TestVault {
    test_vault_with_config(VaultConfig::default().with_grace_period(GRACE))
}

pub fn test_vault_with_config(config: VaultConfig) -> TestVault {
    let store = Arc::new(InMemoryRecordStore::new());
    let crypto = Arc::new(FlakyCrypto::default());
    let remote = Arc::new(MockRemote::default());
    let vault = VaultCoordinator::new(store.clone(), crypto.clone(), remote.clone(), config);
    TestVault {
        vault,
        store,
        crypto,
        remote,
    }
}

impl TestVault {
    /// Store `records` for `account` as if a previous sync had fetched them.
    pub async fn seed(&self, account: &Account, records: Vec<EncryptedRecord>) {
        let snapshot = account.snapshot(records);
        self.store
            .merge_account_keys(&account.user_id, snapshot.keys.clone())
            .await
            .unwrap();
        self.store
            .replace_all(&account.user_id, &snapshot)
            .await
            .unwrap();
    }

    /// Make `account` active and unlocked.
    pub async fn sign_in(&self, account: &Account) {
        self.vault.set_active_user(Some(account.user_id.clone()));
        self.vault
            .unlock(&account.user_id, account.unlock_method(), None)
            .await
            .unwrap();
    }
}

/// Sorted credential names carried by `state`, fresh or stale.
pub fn credential_names(state: &DataState<Vec<CredentialView>>) -> Vec<String> {
    let mut names: Vec<String> = state
        .data()
        .map(|views| views.iter().map(|v| v.name.clone()).collect())
        .unwrap_or_default();
    names.sort();
    names
}
