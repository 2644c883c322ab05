//! Single-flight full sync.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tracing::{Instrument, debug, info, info_span, warn};

use super::{ActiveUser, VaultCoordinator};
use crate::{
    FailureKind, Result,
    state::{DataState, StateError},
    types::{ServerSnapshot, UserId},
};

/// What a call to [`VaultCoordinator::sync`] ended up doing.
///
/// Purely a report: failures are also published into every pipeline state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The store now holds the server's snapshot.
    Completed,
    /// Another sync was in flight or about to start, or there was no active user.
    Skipped,
    /// The sync failed; the failure was published as `NoNetwork` or `Error`.
    Failed(FailureKind),
    /// The active user changed while the request was in flight.
    Discarded,
}

/// Claim on the single-flight flag, released on drop.
pub(super) struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    pub(super) fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Marks a sync as scheduled to follow an unlock, for as long as it is held.
pub(super) struct ScheduledAfterUnlock<'a>(&'a AtomicUsize);

impl<'a> ScheduledAfterUnlock<'a> {
    pub(super) fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ScheduledAfterUnlock<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl VaultCoordinator {
    /// Fetch the active user's vault from the server and replace the local store with it.
    ///
    /// Does nothing if a sync is already running or one is about to run after
    /// an unlock. On failure every pipeline state keeps its value and turns
    /// into `NoNetwork` (connectivity) or `Error` (anything else).
    pub async fn sync(&self) -> SyncOutcome {
        if self.inner.syncs_after_unlock.load(Ordering::Acquire) > 0 {
            debug!("Sync scheduled after unlock, skipping");
            return SyncOutcome::Skipped;
        }
        let Some(claim) = InFlight::claim(&self.inner.sync_in_flight) else {
            debug!("Sync already in flight, skipping");
            return SyncOutcome::Skipped;
        };
        self.sync_claimed(claim, None).await
    }

    /// Sync the active user under an already held claim.
    ///
    /// With `expected` set, the sync only runs if that user is still active.
    pub(super) async fn sync_claimed(
        &self,
        _claim: InFlight<'_>,
        expected: Option<&UserId>,
    ) -> SyncOutcome {
        let Some(active) = self.inner.ctx.active_user() else {
            debug!("No active user, skipping sync");
            return SyncOutcome::Skipped;
        };
        if let Some(expected) = expected
            && *expected != active.user_id
        {
            info!(user_id = %expected, "User no longer active, discarding sync");
            return SyncOutcome::Discarded;
        }
        let span = info_span!("sync", user_id = %active.user_id, generation = active.generation);
        self.run_sync(active).instrument(span).await
    }

    async fn run_sync(&self, active: ActiveUser) -> SyncOutcome {
        self.mark_all(active.generation, Transition::Pending);

        let result = self.inner.remote.full_sync(&active.user_id).await;
        if !self.inner.ctx.is_current(active.generation) {
            info!("Active user changed during sync, discarding result");
            return SyncOutcome::Discarded;
        }

        let result = match result {
            Ok(snapshot) => self.apply_snapshot(&active, snapshot).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(true) => {
                info!("Sync completed");
                SyncOutcome::Completed
            }
            Ok(false) => {
                info!("Active user changed during sync, discarding result");
                SyncOutcome::Discarded
            }
            Err(e) => {
                let kind = e.failure_kind();
                if kind == FailureKind::Connectivity {
                    info!(error = %e, "Sync failed, no network");
                } else {
                    warn!(error = %e, "Sync failed");
                }
                self.mark_all(active.generation, Transition::Failed(Arc::new(e)));
                SyncOutcome::Failed(kind)
            }
        }
    }

    /// Store keys and records from `snapshot`. Returns false if the result went stale.
    async fn apply_snapshot(&self, active: &ActiveUser, snapshot: ServerSnapshot) -> Result<bool> {
        let ctx = &self.inner.ctx;
        let user_id = &active.user_id;

        if ctx
            .store
            .merge_account_keys(user_id, snapshot.keys.clone())
            .await?
        {
            debug!("Stored new account keys");
        }

        if snapshot.has_organization_keys() {
            self.init_org_crypto_after_sync(user_id, &snapshot).await;
        }

        if !ctx.is_current(active.generation) {
            return Ok(false);
        }
        ctx.store.replace_all(user_id, &snapshot).await?;
        Ok(true)
    }

    /// Load organization keys from `snapshot` that the session does not have yet.
    async fn init_org_crypto_after_sync(&self, user_id: &UserId, snapshot: &ServerSnapshot) {
        let ctx = &self.inner.ctx;
        let Some(session) = ctx.sessions.handle(user_id) else {
            return;
        };
        let pending = ctx
            .sessions
            .uninitialized_orgs(user_id, &snapshot.keys.organization_keys);
        if pending.is_empty() {
            return;
        }
        match ctx.crypto.init_org_crypto(user_id, &pending).await {
            Ok(()) => {
                debug!(
                    organizations = pending.len(),
                    "Initialized organization crypto"
                );
                ctx.sessions
                    .mark_orgs_initialized(&session, pending.into_keys());
            }
            Err(e) => warn!(error = %e, "Failed to initialize organization crypto"),
        }
    }

    /// Apply `transition` to all four pipeline states, if `generation` is still current.
    fn mark_all(&self, generation: u64, transition: Transition) {
        let ctx = &self.inner.ctx;
        let pipelines = &self.inner.pipelines;
        ctx.transform(&pipelines.credentials, generation, |s| transition.apply(s));
        ctx.transform(&pipelines.folders, generation, |s| transition.apply(s));
        ctx.transform(&pipelines.collections, generation, |s| transition.apply(s));
        ctx.transform(&pipelines.sends, generation, |s| transition.apply(s));
    }
}

/// State changes a sync pushes into every pipeline.
enum Transition {
    Pending,
    Failed(StateError),
}

impl Transition {
    fn apply<T>(&self, state: DataState<T>) -> DataState<T> {
        match self {
            Transition::Pending => state.into_pending(),
            Transition::Failed(error) => state.into_failed(Arc::clone(error)),
        }
    }
}
