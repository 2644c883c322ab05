//! Vault view aggregation.
//!
//! The snapshot aggregate observes the credential, folder and collection
//! pipelines and publishes their merge once for all of its own observers.
//! Sends are aggregated the same way on their own.

use std::{sync::Arc, time::Duration};

use tracing::{Instrument, info_span, trace};

use super::{ActiveUser, Context, Pipelines};
use crate::{
    observe::{Observable, TaskGuard, spawn_gated},
    state::{DataState, combine3},
    views::{SendCollection, VaultSnapshot},
};

pub(super) fn gate_snapshot(
    ctx: &Arc<Context>,
    snapshot: &Observable<DataState<VaultSnapshot>>,
    pipelines: &Pipelines,
    grace: Duration,
) -> TaskGuard {
    let on_stop = {
        let snapshot = snapshot.clone();
        move || snapshot.set(DataState::Loading)
    };
    let start = {
        let ctx = Arc::clone(ctx);
        let snapshot = snapshot.clone();
        let pipelines = pipelines.clone();
        move |active: ActiveUser| {
            let span = info_span!("vault_snapshot", user_id = %active.user_id);
            run_snapshot(Arc::clone(&ctx), snapshot.clone(), pipelines.clone(), active)
                .instrument(span)
        }
    };
    spawn_gated(
        "vault_snapshot",
        snapshot,
        ctx.active.subscribe(),
        grace,
        on_stop,
        start,
    )
}

async fn run_snapshot(
    ctx: Arc<Context>,
    snapshot: Observable<DataState<VaultSnapshot>>,
    pipelines: Pipelines,
    active: ActiveUser,
) {
    // Holding these observers is what keeps the three pipelines running
    let mut credentials = pipelines.credentials.subscribe();
    let mut folders = pipelines.folders.subscribe();
    let mut collections = pipelines.collections.subscribe();

    loop {
        let merged = combine3(
            credentials.latest(),
            folders.latest(),
            collections.latest(),
            |credentials, folders, collections| VaultSnapshot {
                credentials,
                folders,
                collections,
            },
        );
        trace!(state = ?merged.kind(), "Merged vault snapshot");
        ctx.publish(&snapshot, active.generation, merged);

        tokio::select! {
            Some(_) = credentials.changed() => {}
            Some(_) = folders.changed() => {}
            Some(_) = collections.changed() => {}
            else => break,
        }
    }
}

pub(super) fn gate_send_collection(
    ctx: &Arc<Context>,
    send_collection: &Observable<DataState<SendCollection>>,
    pipelines: &Pipelines,
    grace: Duration,
) -> TaskGuard {
    let on_stop = {
        let send_collection = send_collection.clone();
        move || send_collection.set(DataState::Loading)
    };
    let start = {
        let ctx = Arc::clone(ctx);
        let send_collection = send_collection.clone();
        let sends = pipelines.sends.clone();
        move |active: ActiveUser| {
            let ctx = Arc::clone(&ctx);
            let send_collection = send_collection.clone();
            let mut sends = sends.subscribe();
            let span = info_span!("send_collection", user_id = %active.user_id);
            async move {
                loop {
                    let merged = sends.latest().map(|sends| SendCollection { sends });
                    ctx.publish(&send_collection, active.generation, merged);
                    if sends.changed().await.is_none() {
                        break;
                    }
                }
            }
            .instrument(span)
        }
    };
    spawn_gated(
        "send_collection",
        send_collection,
        ctx.active.subscribe(),
        grace,
        on_stop,
        start,
    )
}
