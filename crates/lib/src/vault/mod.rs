//! The vault coordinator.
//!
//! [`VaultCoordinator`] owns everything that is per-coordinator state:
//! - the set of unlocked users and their crypto sessions
//! - the active user and its generation counter
//! - the single-flight sync flag
//! - the four decryption pipelines and the two aggregates built on them
//!
//! Pipelines only run while observed. Every value a pipeline publishes is
//! tagged with the generation it was computed under and dropped if the
//! active user changed in the meantime, so one user's plaintext is never
//! published after a switch to another.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use handle_trait::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
    Result,
    config::VaultConfig,
    crypto::{CryptoBoundary, SessionHandle},
    observe::{Observable, Observer, TaskGuard},
    remote::RemoteApi,
    state::DataState,
    store::RecordStore,
    types::{OrganizationId, RecordId, UserId},
    views::{CollectionView, CredentialView, FolderView, SendCollection, SendView, VaultSnapshot},
};

mod aggregate;
mod errors;
mod mutations;
mod pipeline;
mod session;
mod sync;

pub use errors::SessionError;
pub use sync::SyncOutcome;

/// The active user as seen by gated pipelines.
///
/// Two values for the same user with different generations are different
/// keys, so re-selecting a user restarts its pipelines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ActiveUser {
    pub(crate) user_id: UserId,
    pub(crate) generation: u64,
}

/// Snapshot of who is active and who is unlocked.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LockState {
    pub active_user: Option<UserId>,
    pub unlocked: BTreeSet<UserId>,
}

impl LockState {
    pub fn is_unlocked(&self, user_id: &UserId) -> bool {
        self.unlocked.contains(user_id)
    }

    /// Whether there is an active user and its vault is unlocked.
    pub fn is_active_unlocked(&self) -> bool {
        self.active_user
            .as_ref()
            .is_some_and(|user| self.unlocked.contains(user))
    }
}

struct SessionEntry {
    handle: SessionHandle,
    /// Organizations whose keys are loaded into this session.
    organizations: HashSet<OrganizationId>,
}

/// Crypto sessions of unlocked users.
///
/// The key set of `entries` and the value of `unlocked` always agree; both
/// are only changed together under the `entries` lock.
pub(crate) struct SessionTable {
    entries: Mutex<HashMap<UserId, SessionEntry>>,
    unlocked: watch::Sender<BTreeSet<UserId>>,
}

impl SessionTable {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            unlocked: watch::Sender::new(BTreeSet::new()),
        }
    }

    pub(crate) fn handle(&self, user_id: &UserId) -> Option<SessionHandle> {
        let entries = self.entries.lock().unwrap();
        entries.get(user_id).map(|entry| entry.handle.clone())
    }

    /// Store `handle` as its user's session.
    ///
    /// Subscribers are woken when the user was locked and also when an
    /// existing session is replaced, since the old handle no longer decrypts.
    pub(crate) fn insert(&self, handle: SessionHandle, organizations: HashSet<OrganizationId>) {
        let mut entries = self.entries.lock().unwrap();
        let user_id = handle.user_id().clone();
        let previous = entries.insert(
            user_id.clone(),
            SessionEntry {
                handle: handle.clone(),
                organizations,
            },
        );
        let replaced = previous.is_some_and(|entry| entry.handle != handle);
        self.unlocked
            .send_if_modified(|set| set.insert(user_id) || replaced);
    }

    /// Returns true if the user had a session.
    pub(crate) fn remove(&self, user_id: &UserId) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let removed = entries.remove(user_id).is_some();
        self.unlocked.send_if_modified(|set| set.remove(user_id));
        removed
    }

    /// The entries of `org_keys` not yet loaded into `user_id`'s session.
    pub(crate) fn uninitialized_orgs(
        &self,
        user_id: &UserId,
        org_keys: &HashMap<OrganizationId, String>,
    ) -> HashMap<OrganizationId, String> {
        let entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get(user_id) else {
            return HashMap::new();
        };
        org_keys
            .iter()
            .filter(|(org, _)| !entry.organizations.contains(*org))
            .map(|(org, key)| (org.clone(), key.clone()))
            .collect()
    }

    /// Record `organizations` as loaded, unless the session changed since `handle` was taken.
    pub(crate) fn mark_orgs_initialized(
        &self,
        handle: &SessionHandle,
        organizations: impl IntoIterator<Item = OrganizationId>,
    ) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(handle.user_id())
            && entry.handle == *handle
        {
            entry.organizations.extend(organizations);
        }
    }

    pub(crate) fn unlocked(&self) -> BTreeSet<UserId> {
        self.unlocked.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<BTreeSet<UserId>> {
        self.unlocked.subscribe()
    }
}

/// The parts of the coordinator that background tasks hold on to.
///
/// Holds no task handles, so tasks keeping it alive never keep the
/// coordinator alive.
pub(crate) struct Context {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) crypto: Arc<dyn CryptoBoundary>,
    pub(crate) sessions: SessionTable,
    pub(crate) active: watch::Sender<Option<ActiveUser>>,
    generation: AtomicU64,
}

impl Context {
    pub(crate) fn active_user(&self) -> Option<ActiveUser> {
        self.active.borrow().clone()
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Start a new generation. Work tagged with an older one is dropped.
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Publish `value` if `generation` is still current and the value is new.
    pub(crate) fn publish<T>(&self, state: &Observable<T>, generation: u64, value: T) -> bool
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        state.update(|current| {
            if !self.is_current(generation) || *current == value {
                return false;
            }
            *current = value;
            true
        })
    }

    /// Replace the published state with `f(state)` if `generation` is still current.
    pub(crate) fn transform<T>(
        &self,
        state: &Observable<DataState<T>>,
        generation: u64,
        f: impl FnOnce(DataState<T>) -> DataState<T>,
    ) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        state.update(|current| {
            if !self.is_current(generation) {
                return false;
            }
            let previous = std::mem::take(current);
            *current = f(previous);
            true
        })
    }
}

pub(crate) type ListState<V> = Observable<DataState<Vec<V>>>;

/// The four per-kind pipeline states.
#[derive(Clone)]
pub(crate) struct Pipelines {
    pub(crate) credentials: ListState<CredentialView>,
    pub(crate) folders: ListState<FolderView>,
    pub(crate) collections: ListState<CollectionView>,
    pub(crate) sends: ListState<SendView>,
}

impl Pipelines {
    fn new() -> Self {
        Self {
            credentials: Observable::new(DataState::Loading),
            folders: Observable::new(DataState::Loading),
            collections: Observable::new(DataState::Loading),
            sends: Observable::new(DataState::Loading),
        }
    }

    fn reset(&self) {
        self.credentials.set(DataState::Loading);
        self.folders.set(DataState::Loading);
        self.collections.set(DataState::Loading);
        self.sends.set(DataState::Loading);
    }
}

pub(crate) struct VaultInner {
    ctx: Arc<Context>,
    remote: Arc<dyn RemoteApi>,
    config: VaultConfig,
    /// Set while a sync is running.
    sync_in_flight: AtomicBool,
    /// Number of `unlock_and_sync` calls that have not yet claimed their sync.
    syncs_after_unlock: AtomicUsize,
    pipelines: Pipelines,
    snapshot: Observable<DataState<VaultSnapshot>>,
    send_collection: Observable<DataState<SendCollection>>,
    lock_state: Observable<LockState>,
    _gates: Vec<TaskGuard>,
}

impl fmt::Debug for VaultInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultInner")
            .field("active_user", &self.ctx.active_user())
            .field("unlocked", &self.ctx.sessions.unlocked())
            .field("sync_in_flight", &self.sync_in_flight.load(Ordering::Relaxed))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Coordinates lock state, sync and decrypted views for every known account.
///
/// `VaultCoordinator` is a cheap-to-clone handle around `Arc<VaultInner>`.
/// Background tasks stop when the last handle is dropped.
///
/// Must be created inside a tokio runtime.
#[derive(Clone, Debug, Handle)]
pub struct VaultCoordinator {
    inner: Arc<VaultInner>,
}

impl VaultCoordinator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        crypto: Arc<dyn CryptoBoundary>,
        remote: Arc<dyn RemoteApi>,
        config: VaultConfig,
    ) -> Self {
        let ctx = Arc::new(Context {
            store,
            crypto,
            sessions: SessionTable::new(),
            active: watch::Sender::new(None),
            generation: AtomicU64::new(0),
        });
        let grace = config.grace_period();
        let pipelines = Pipelines::new();
        let snapshot = Observable::new(DataState::Loading);
        let send_collection = Observable::new(DataState::Loading);

        let gates = vec![
            pipeline::gate(&ctx, &pipelines.credentials, grace),
            pipeline::gate(&ctx, &pipelines.folders, grace),
            pipeline::gate(&ctx, &pipelines.collections, grace),
            pipeline::gate(&ctx, &pipelines.sends, grace),
            aggregate::gate_snapshot(&ctx, &snapshot, &pipelines, grace),
            aggregate::gate_send_collection(&ctx, &send_collection, &pipelines, grace),
        ];

        Self {
            inner: Arc::new(VaultInner {
                ctx,
                remote,
                config,
                sync_in_flight: AtomicBool::new(false),
                syncs_after_unlock: AtomicUsize::new(0),
                pipelines,
                snapshot,
                send_collection,
                lock_state: Observable::new(LockState::default()),
                _gates: gates,
            }),
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.inner.config
    }

    /// The active user, if any.
    pub fn active_user(&self) -> Option<UserId> {
        self.inner.ctx.active_user().map(|active| active.user_id)
    }

    /// Switch the active account.
    ///
    /// In-memory data is cleared first, results still in flight for the
    /// previous user are discarded, and observed pipelines restart for the
    /// new user.
    pub fn set_active_user(&self, user_id: Option<UserId>) {
        let ctx = &self.inner.ctx;
        let generation = ctx.next_generation();
        self.reset_states();
        info!(user_id = ?user_id, generation, "Switching active user");
        ctx.active
            .send_replace(user_id.map(|user_id| ActiveUser { user_id, generation }));
        self.refresh_lock_state();
    }

    /// Reset all published states to `Loading`.
    ///
    /// Sessions and the unlocked set are untouched. Observed pipelines for the
    /// active user restart and republish; in-flight sync results computed
    /// before the clear are discarded.
    pub fn clear_in_memory_data(&self) {
        let ctx = &self.inner.ctx;
        let generation = ctx.next_generation();
        self.reset_states();
        ctx.active.send_modify(|active| {
            if let Some(active) = active {
                active.generation = generation;
            }
        });
        debug!(generation, "Cleared in-memory data");
    }

    fn reset_states(&self) {
        self.inner.pipelines.reset();
        self.inner.snapshot.set(DataState::Loading);
        self.inner.send_collection.set(DataState::Loading);
    }

    /// Lock `user_id` and delete every record and key stored for it.
    pub async fn logout(&self, user_id: &UserId) -> Result<()> {
        self.lock(user_id).await;
        self.inner.ctx.store.delete_all(user_id).await?;
        if self.active_user().as_ref() == Some(user_id) {
            self.set_active_user(None);
        }
        info!(user_id = %user_id, "Logged out");
        Ok(())
    }

    pub fn is_unlocked(&self, user_id: &UserId) -> bool {
        self.inner.ctx.sessions.handle(user_id).is_some()
    }

    pub fn unlocked_users(&self) -> BTreeSet<UserId> {
        self.inner.ctx.sessions.unlocked()
    }

    /// Recompute the lock state from the active user and the session table.
    ///
    /// Both are read while the lock state is held for writing, so the last
    /// refresh always publishes what it saw last.
    fn refresh_lock_state(&self) {
        let ctx = &self.inner.ctx;
        self.inner.lock_state.update(|current| {
            let state = LockState {
                active_user: ctx.active_user().map(|active| active.user_id),
                unlocked: ctx.sessions.unlocked(),
            };
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    pub fn lock_state_stream(&self) -> Observer<LockState> {
        self.inner.lock_state.subscribe()
    }

    /// The merged credentials, folders and collections of the active user.
    pub fn vault_snapshot_stream(&self) -> Observer<DataState<VaultSnapshot>> {
        self.inner.snapshot.subscribe()
    }

    pub fn send_collection_stream(&self) -> Observer<DataState<SendCollection>> {
        self.inner.send_collection.subscribe()
    }

    pub fn credentials_stream(&self) -> Observer<DataState<Vec<CredentialView>>> {
        self.inner.pipelines.credentials.subscribe()
    }

    pub fn folders_stream(&self) -> Observer<DataState<Vec<FolderView>>> {
        self.inner.pipelines.folders.subscribe()
    }

    pub fn collections_stream(&self) -> Observer<DataState<Vec<CollectionView>>> {
        self.inner.pipelines.collections.subscribe()
    }

    pub fn sends_stream(&self) -> Observer<DataState<Vec<SendView>>> {
        self.inner.pipelines.sends.subscribe()
    }

    /// A single credential, looked up in the vault snapshot.
    ///
    /// `None` inside a data-carrying state means there is no such credential.
    pub fn credential_stream(&self, id: RecordId) -> Observer<DataState<Option<CredentialView>>> {
        self.vault_snapshot_stream()
            .map(move |state| state.as_ref().map(|s| s.credential(&id).cloned()))
    }

    pub fn folder_stream(&self, id: RecordId) -> Observer<DataState<Option<FolderView>>> {
        self.vault_snapshot_stream()
            .map(move |state| state.as_ref().map(|s| s.folder(&id).cloned()))
    }

    pub fn collection_stream(&self, id: RecordId) -> Observer<DataState<Option<CollectionView>>> {
        self.vault_snapshot_stream()
            .map(move |state| state.as_ref().map(|s| s.collection(&id).cloned()))
    }

    pub fn send_stream(&self, id: RecordId) -> Observer<DataState<Option<SendView>>> {
        self.send_collection_stream()
            .map(move |state| state.as_ref().map(|s| s.send(&id).cloned()))
    }
}
