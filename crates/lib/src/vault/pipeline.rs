//! Decryption pipelines: encrypted store → crypto session → published `DataState`.

use std::{sync::Arc, time::Duration};

use tracing::{Instrument, debug, info_span, trace};

use super::{ActiveUser, Context, ListState, SessionError};
use crate::{
    Error,
    observe::{TaskGuard, spawn_gated},
    state::DataState,
    views::VaultView,
};

/// Gate the pipeline for `V` on its observers and the active user.
pub(super) fn gate<V: VaultView>(
    ctx: &Arc<Context>,
    state: &ListState<V>,
    grace: Duration,
) -> TaskGuard {
    let on_stop = {
        let state = state.clone();
        move || state.set(DataState::Loading)
    };
    let start = {
        let ctx = Arc::clone(ctx);
        let state = state.clone();
        move |active: ActiveUser| {
            let kind = V::KIND;
            let span = info_span!("pipeline", kind = %kind, user_id = %active.user_id);
            run(Arc::clone(&ctx), state.clone(), active).instrument(span)
        }
    };
    spawn_gated(
        V::KIND.as_str(),
        state,
        ctx.active.subscribe(),
        grace,
        on_stop,
        start,
    )
}

/// Decrypt every record list the store emits for `active`, until aborted.
///
/// Re-evaluates whenever the stored list or the set of unlocked users changes.
async fn run<V: VaultView>(ctx: Arc<Context>, state: ListState<V>, active: ActiveUser) {
    let user_id = &active.user_id;
    ctx.publish(&state, active.generation, DataState::Loading);

    let mut records = match ctx.store.subscribe(user_id, V::KIND) {
        Ok(records) => records,
        Err(e) => {
            debug!(error = %e, "Failed to subscribe to record store");
            ctx.publish(&state, active.generation, DataState::error(e, None));
            return;
        }
    };
    let mut unlocked = ctx.sessions.subscribe();

    loop {
        let list = records.borrow_and_update().clone();
        unlocked.mark_unchanged();

        let next = match ctx.sessions.handle(user_id) {
            // A locked vault shows no plaintext at all, not even stale values
            None => DataState::error(
                Error::from(SessionError::VaultLocked {
                    user_id: user_id.clone(),
                }),
                None,
            ),
            Some(session) => match ctx.crypto.decrypt(&session, V::KIND, &list).await {
                // Locked or re-unlocked while decrypting
                _ if ctx.sessions.handle(user_id).as_ref() != Some(&session) => {
                    trace!("Session changed during decrypt, re-evaluating");
                    continue;
                }
                Ok(views) => {
                    let views: Vec<V> = views.into_iter().filter_map(V::from_plaintext).collect();
                    trace!(count = views.len(), "Decrypted");
                    DataState::Loaded(views)
                }
                Err(e) => {
                    debug!(error = %e, "Decryption failed");
                    DataState::error(e, state.value().into_data())
                }
            },
        };
        ctx.publish(&state, active.generation, next);

        tokio::select! {
            changed = records.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = unlocked.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
