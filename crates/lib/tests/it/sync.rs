//! Single-flight sync, failure classification and discarded results

use vaultsync::{
    FailureKind, RecordKind, StateKind, SyncOutcome, VaultConfig, store::RecordStore,
};

use crate::helpers::{
    Account, Failure, GRACE, credential_names, test_vault, test_vault_with_config, within,
};

#[tokio::test]
async fn test_sync_replaces_store_with_server_snapshot() {
    let tv = test_vault();
    let alice = Account::new("alice");
    tv.seed(&alice, vec![alice.credential("old", "stale")]).await;
    tv.remote.set_snapshot(
        &alice.user_id,
        alice.snapshot(vec![
            alice.credential("c1", "bank"),
            alice.credential("c2", "mail"),
            alice.send("s1", "wifi"),
        ]),
    );
    tv.sign_in(&alice).await;

    let mut credentials = tv.vault.credentials_stream();
    assert_eq!(tv.vault.sync().await, SyncOutcome::Completed);

    let state = within(credentials.wait_for(|s| credential_names(s).len() == 2))
        .await
        .unwrap();
    assert_eq!(credential_names(&state), vec!["bank", "mail"]);
    assert_eq!(
        tv.store
            .records(&alice.user_id, RecordKind::Send)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_sync_without_active_user_is_skipped() {
    let tv = test_vault();
    assert_eq!(tv.vault.sync().await, SyncOutcome::Skipped);
    assert_eq!(tv.remote.full_sync_calls(), 0);
}

#[tokio::test]
async fn test_concurrent_sync_is_single_flight() {
    let tv = test_vault();
    let alice = Account::new("alice");
    tv.remote
        .set_snapshot(&alice.user_id, alice.snapshot(vec![alice.credential("c1", "bank")]));
    tv.sign_in(&alice).await;

    let gate = tv.remote.hold_syncs();
    let first = {
        let vault = tv.vault.clone();
        tokio::spawn(async move { vault.sync().await })
    };
    tv.remote.sync_started().await;

    assert_eq!(tv.vault.sync().await, SyncOutcome::Skipped);
    assert_eq!(tv.vault.sync().await, SyncOutcome::Skipped);

    gate.notify_one();
    assert_eq!(within(first).await.unwrap(), SyncOutcome::Completed);
    assert_eq!(tv.remote.full_sync_calls(), 1);

    // The flag is released once the sync finishes
    tv.remote.hold_syncs().notify_one();
    assert_eq!(tv.vault.sync().await, SyncOutcome::Completed);
    assert_eq!(tv.remote.full_sync_calls(), 2);
}

#[tokio::test]
async fn test_sync_requested_during_unlock_is_folded_into_unlock_sync() {
    let tv = test_vault();
    let alice = Account::new("alice");
    tv.remote
        .set_snapshot(&alice.user_id, alice.snapshot(vec![alice.credential("c1", "bank")]));
    tv.vault.set_active_user(Some(alice.user_id.clone()));

    let gate = tv.crypto.hold_unlocks();
    let unlocking = {
        let vault = tv.vault.clone();
        let user_id = alice.user_id.clone();
        let method = alice.unlock_method();
        tokio::spawn(async move { vault.unlock_and_sync(&user_id, method, None).await })
    };
    tv.crypto.unlock_started().await;

    assert_eq!(tv.vault.sync().await, SyncOutcome::Skipped);
    assert_eq!(tv.remote.full_sync_calls(), 0);

    gate.notify_one();
    let outcome = within(unlocking).await.unwrap().unwrap();
    assert_eq!(outcome, SyncOutcome::Completed);
    assert_eq!(tv.remote.full_sync_calls(), 1);
    assert!(tv.vault.is_unlocked(&alice.user_id));
}

#[tokio::test]
async fn test_unlock_and_sync_requires_active_user() {
    let tv = test_vault();
    let alice = Account::new("alice");
    let bob = Account::new("bob");
    tv.remote
        .set_snapshot(&bob.user_id, bob.snapshot(vec![bob.credential("c1", "bank")]));
    tv.vault.set_active_user(Some(alice.user_id.clone()));

    let err = tv
        .vault
        .unlock_and_sync(&bob.user_id, bob.unlock_method(), None)
        .await
        .unwrap_err();

    assert!(err.is_invalid_session_state());
    assert_eq!(err.module(), "vault");
    assert!(!tv.vault.is_unlocked(&bob.user_id));
    assert_eq!(tv.remote.full_sync_calls(), 0);

    tv.vault.set_active_user(Some(bob.user_id.clone()));
    let outcome = tv
        .vault
        .unlock_and_sync(&bob.user_id, bob.unlock_method(), None)
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Completed);
    assert_eq!(
        tv.store
            .records(&bob.user_id, RecordKind::Credential)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_unlock_and_sync_discarded_after_user_switch() {
    let tv = test_vault();
    let alice = Account::new("alice");
    let bob = Account::new("bob");
    tv.vault.set_active_user(Some(alice.user_id.clone()));

    let gate = tv.crypto.hold_unlocks();
    let unlocking = {
        let vault = tv.vault.clone();
        let user_id = alice.user_id.clone();
        let method = alice.unlock_method();
        tokio::spawn(async move { vault.unlock_and_sync(&user_id, method, None).await })
    };
    tv.crypto.unlock_started().await;

    tv.vault.set_active_user(Some(bob.user_id.clone()));
    gate.notify_one();

    let outcome = within(unlocking).await.unwrap().unwrap();
    assert_eq!(outcome, SyncOutcome::Discarded);
    assert!(tv.vault.is_unlocked(&alice.user_id));
    assert_eq!(tv.remote.full_sync_calls(), 0);
}

#[tokio::test]
async fn test_unlock_and_sync_respects_config() {
    let config = VaultConfig {
        sync_on_unlock: false,
        ..VaultConfig::default().with_grace_period(GRACE)
    };
    let tv = test_vault_with_config(config);
    let alice = Account::new("alice");
    tv.vault.set_active_user(Some(alice.user_id.clone()));

    let outcome = tv
        .vault
        .unlock_and_sync(&alice.user_id, alice.unlock_method(), None)
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Skipped);
    assert!(tv.vault.is_unlocked(&alice.user_id));
    assert_eq!(tv.remote.full_sync_calls(), 0);
}

#[tokio::test]
async fn test_failed_unlock_does_not_sync() {
    let tv = test_vault();
    let alice = Account::new("alice");
    let mallory = Account::new("mallory");
    tv.vault.set_active_user(Some(alice.user_id.clone()));

    // Another account's request key cannot open alice's user key
    let method = vaultsync::crypto::UnlockMethod::auth_request(
        mallory.request_key.to_vec(),
        alice.keys.protected_user_key.clone().unwrap(),
    );
    let err = tv
        .vault
        .unlock_and_sync(&alice.user_id, method, None)
        .await
        .unwrap_err();

    assert!(err.is_crypto_error());
    assert_eq!(tv.remote.full_sync_calls(), 0);

    // The scheduled-sync marker was released with the failed unlock
    assert_eq!(tv.vault.sync().await, SyncOutcome::Completed);
}

#[tokio::test]
async fn test_offline_sync_marks_every_pipeline_no_network() {
    let tv = test_vault();
    let alice = Account::new("alice");
    tv.seed(
        &alice,
        vec![
            alice.credential("c1", "bank"),
            alice.folder("f1", "work"),
            alice.send("s1", "wifi"),
        ],
    )
    .await;
    tv.sign_in(&alice).await;

    let mut credentials = tv.vault.credentials_stream();
    let mut folders = tv.vault.folders_stream();
    let mut collections = tv.vault.collections_stream();
    let mut sends = tv.vault.sends_stream();
    within(credentials.wait_for(|s| s.is_loaded())).await.unwrap();
    within(folders.wait_for(|s| s.is_loaded())).await.unwrap();
    within(collections.wait_for(|s| s.is_loaded())).await.unwrap();
    within(sends.wait_for(|s| s.is_loaded())).await.unwrap();

    tv.remote.fail_syncs(Some(Failure::Offline));
    assert_eq!(
        tv.vault.sync().await,
        SyncOutcome::Failed(FailureKind::Connectivity)
    );

    let state = credentials.latest();
    assert_eq!(state.kind(), StateKind::NoNetwork);
    assert_eq!(credential_names(&state), vec!["bank"]);

    let state = folders.latest();
    assert_eq!(state.kind(), StateKind::NoNetwork);
    assert_eq!(state.data().unwrap()[0].name, "work");

    let state = collections.latest();
    assert_eq!(state.kind(), StateKind::NoNetwork);
    assert_eq!(state.data().map(Vec::len), Some(0));

    let state = sends.latest();
    assert_eq!(state.kind(), StateKind::NoNetwork);
    assert_eq!(state.data().unwrap()[0].name, "wifi");

    // The merged snapshot reports the worst state
    let mut snapshot = tv.vault.vault_snapshot_stream();
    let state = within(snapshot.wait_for(|s| s.kind() == StateKind::NoNetwork))
        .await
        .unwrap();
    assert_eq!(state.data().unwrap().credentials.len(), 1);
}

#[tokio::test]
async fn test_rejected_sync_marks_pipelines_error_with_data() {
    let tv = test_vault();
    let alice = Account::new("alice");
    tv.seed(&alice, vec![alice.credential("c1", "bank")]).await;
    tv.sign_in(&alice).await;

    let mut credentials = tv.vault.credentials_stream();
    within(credentials.wait_for(|s| s.is_loaded())).await.unwrap();

    tv.remote.fail_syncs(Some(Failure::Reject(500)));
    assert_eq!(
        tv.vault.sync().await,
        SyncOutcome::Failed(FailureKind::RemoteRejection)
    );

    let state = credentials.latest();
    assert_eq!(state.kind(), StateKind::Error);
    assert!(state.error_cause().unwrap().is_remote_rejection());
    assert_eq!(credential_names(&state), vec!["bank"]);

    // Local data is untouched
    assert_eq!(
        tv.store
            .records(&alice.user_id, RecordKind::Credential)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_pipelines_are_pending_while_sync_runs() {
    let tv = test_vault();
    let alice = Account::new("alice");
    tv.seed(&alice, vec![alice.credential("c1", "bank")]).await;
    tv.remote.set_snapshot(
        &alice.user_id,
        alice.snapshot(vec![
            alice.credential("c1", "bank"),
            alice.credential("c2", "mail"),
        ]),
    );
    tv.sign_in(&alice).await;

    let mut credentials = tv.vault.credentials_stream();
    within(credentials.wait_for(|s| s.is_loaded())).await.unwrap();

    let gate = tv.remote.hold_syncs();
    let syncing = {
        let vault = tv.vault.clone();
        tokio::spawn(async move { vault.sync().await })
    };
    tv.remote.sync_started().await;

    let state = credentials.latest();
    assert_eq!(state.kind(), StateKind::Pending);
    assert_eq!(credential_names(&state), vec!["bank"]);

    gate.notify_one();
    assert_eq!(within(syncing).await.unwrap(), SyncOutcome::Completed);
    let state = within(credentials.wait_for(|s| s.is_loaded())).await.unwrap();
    assert_eq!(credential_names(&state), vec!["bank", "mail"]);
}

#[tokio::test]
async fn test_sync_result_discarded_after_user_switch() {
    let tv = test_vault();
    let alice = Account::new("alice");
    let bob = Account::new("bob");
    tv.remote
        .set_snapshot(&alice.user_id, alice.snapshot(vec![alice.credential("c1", "bank")]));
    tv.sign_in(&alice).await;

    let gate = tv.remote.hold_syncs();
    let syncing = {
        let vault = tv.vault.clone();
        tokio::spawn(async move { vault.sync().await })
    };
    tv.remote.sync_started().await;

    tv.vault.set_active_user(Some(bob.user_id.clone()));
    gate.notify_one();

    assert_eq!(within(syncing).await.unwrap(), SyncOutcome::Discarded);
    assert!(
        tv.store
            .records(&alice.user_id, RecordKind::Credential)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        tv.store
            .account_keys(&alice.user_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_failure_after_user_switch_is_not_published() {
    let tv = test_vault();
    let alice = Account::new("alice");
    let bob = Account::new("bob");
    tv.sign_in(&alice).await;
    tv.remote.fail_syncs(Some(Failure::Offline));

    let gate = tv.remote.hold_syncs();
    let syncing = {
        let vault = tv.vault.clone();
        tokio::spawn(async move { vault.sync().await })
    };
    tv.remote.sync_started().await;

    tv.vault.set_active_user(Some(bob.user_id.clone()));
    let credentials = tv.vault.credentials_stream();
    gate.notify_one();

    assert_eq!(within(syncing).await.unwrap(), SyncOutcome::Discarded);
    assert_ne!(credentials.current().kind(), StateKind::NoNetwork);
}

#[tokio::test]
async fn test_sync_initializes_organization_crypto() {
    let tv = test_vault();
    let mut alice = Account::new("alice");
    let acme = alice.join_organization("acme");
    tv.remote.set_snapshot(
        &alice.user_id,
        alice.snapshot(vec![
            alice.credential("c1", "personal"),
            alice.org_credential("c2", "shared", &acme),
        ]),
    );

    // Nothing stored yet, so the unlock itself has no organization keys
    tv.sign_in(&alice).await;
    let mut credentials = tv.vault.credentials_stream();

    assert_eq!(tv.vault.sync().await, SyncOutcome::Completed);

    let state = within(
        credentials.wait_for(|s| s.is_loaded() && credential_names(s).len() == 2),
    )
    .await
    .unwrap();
    assert_eq!(credential_names(&state), vec!["personal", "shared"]);
    assert!(
        tv.store
            .account_keys(&alice.user_id)
            .await
            .unwrap()
            .organization_keys
            .contains_key(&acme)
    );
}

#[tokio::test]
async fn test_sync_initializes_organizations_joined_later() {
    let tv = test_vault();
    let mut alice = Account::new("alice");
    let acme = alice.join_organization("acme");
    tv.remote.set_snapshot(
        &alice.user_id,
        alice.snapshot(vec![
            alice.credential("c1", "personal"),
            alice.org_credential("c2", "shared", &acme),
        ]),
    );
    tv.sign_in(&alice).await;
    let mut credentials = tv.vault.credentials_stream();

    assert_eq!(tv.vault.sync().await, SyncOutcome::Completed);
    within(credentials.wait_for(|s| s.is_loaded() && credential_names(s).len() == 2))
        .await
        .unwrap();

    let globex = alice.join_organization("globex");
    tv.remote.set_snapshot(
        &alice.user_id,
        alice.snapshot(vec![
            alice.credential("c1", "personal"),
            alice.org_credential("c2", "shared", &acme),
            alice.org_credential("c3", "team", &globex),
        ]),
    );

    assert_eq!(tv.vault.sync().await, SyncOutcome::Completed);
    let state = within(
        credentials.wait_for(|s| s.is_loaded() && credential_names(s).len() == 3),
    )
    .await
    .unwrap();
    assert_eq!(credential_names(&state), vec!["personal", "shared", "team"]);
}
