//! Unlock and lock.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use super::{
    SessionError, VaultCoordinator,
    sync::{InFlight, ScheduledAfterUnlock, SyncOutcome},
};
use crate::{
    Result,
    crypto::UnlockMethod,
    types::{OrganizationId, UserId},
};

impl VaultCoordinator {
    /// Open `user_id`'s vault.
    ///
    /// With `org_keys` of `None` the organization keys stored by earlier syncs
    /// are used. A failure to initialize organization crypto does not fail the
    /// unlock. On error the user stays locked.
    pub async fn unlock(
        &self,
        user_id: &UserId,
        method: UnlockMethod,
        org_keys: Option<HashMap<OrganizationId, String>>,
    ) -> Result<()> {
        let ctx = &self.inner.ctx;
        let stored = ctx.store.account_keys(user_id).await?;
        if matches!(method, UnlockMethod::MasterPassword { .. })
            && stored.protected_user_key.is_none()
        {
            return Err(SessionError::MissingUserKey {
                user_id: user_id.clone(),
            }
            .into());
        }

        let session = ctx.crypto.init_session(user_id, &method, &stored).await?;

        let org_keys = org_keys.unwrap_or(stored.organization_keys);
        let mut organizations = HashSet::new();
        if !org_keys.is_empty() {
            match ctx.crypto.init_org_crypto(user_id, &org_keys).await {
                Ok(()) => organizations = org_keys.keys().cloned().collect(),
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Failed to initialize organization crypto")
                }
            }
        }

        ctx.sessions.insert(session, organizations);
        self.refresh_lock_state();
        info!(user_id = %user_id, method = method.name(), "Vault unlocked");
        Ok(())
    }

    /// Unlock the active user, then sync once.
    ///
    /// Fails with [`SessionError::NotActiveUser`] if `user_id` is not the
    /// active user. If the active user changes during the unlock the sync is
    /// `Discarded`.
    ///
    /// Any `sync()` requested while the unlock is in progress is skipped in
    /// favour of this one. If another sync is already in flight when the
    /// unlock finishes, that sync stands in for this one and the outcome is
    /// `Skipped`.
    pub async fn unlock_and_sync(
        &self,
        user_id: &UserId,
        method: UnlockMethod,
        org_keys: Option<HashMap<OrganizationId, String>>,
    ) -> Result<SyncOutcome> {
        if self.active_user().as_ref() != Some(user_id) {
            return Err(SessionError::NotActiveUser {
                user_id: user_id.clone(),
            }
            .into());
        }
        if !self.inner.config.sync_on_unlock {
            self.unlock(user_id, method, org_keys).await?;
            return Ok(SyncOutcome::Skipped);
        }

        let scheduled = ScheduledAfterUnlock::new(&self.inner.syncs_after_unlock);
        self.unlock(user_id, method, org_keys).await?;

        // Claim before releasing the schedule so no plain sync slips in between
        let claim = InFlight::claim(&self.inner.sync_in_flight);
        drop(scheduled);

        match claim {
            Some(claim) => Ok(self.sync_claimed(claim, Some(user_id)).await),
            None => {
                debug!("Sync already in flight after unlock");
                Ok(SyncOutcome::Skipped)
            }
        }
    }

    /// Close `user_id`'s vault. Locking a locked vault is a no-op.
    ///
    /// Stored records are kept.
    pub async fn lock(&self, user_id: &UserId) {
        let ctx = &self.inner.ctx;
        let was_unlocked = ctx.sessions.remove(user_id);
        ctx.crypto.end_session(user_id).await;
        self.refresh_lock_state();
        if was_unlocked {
            info!(user_id = %user_id, "Vault locked");
        }
    }
}
