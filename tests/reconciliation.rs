//! Reconciliation listener and account quarantine.

mod common;

use std::time::Duration;

use tokio::sync::mpsc;

use common::*;
use stellar_bridge::builder::TransactionBuilder;
use stellar_bridge::engine::TxStatus;
use stellar_bridge::error::BridgeError;
use stellar_bridge::events::LifecycleKind;
use stellar_bridge::network::{RejectionReason, SubmitOutcome, SubmitStep};
use stellar_bridge::store::BridgeStore;

#[tokio::test]
async fn test_unknown_activity_is_flagged_not_adopted() {
    let t = test_bridge();
    t.bridge.engine.process_event(deposit("e1", "A1", 500)).await.unwrap();
    let account = external_account("A1");

    // Nothing changed on the network: no flag.
    let report = t.bridge.listener.tick().await.unwrap();
    assert_eq!(report.flagged, 0);

    t.network.bump_sequence(&account, 1);
    let report = t.bridge.listener.tick().await.unwrap();
    assert_eq!(report.flagged, 1);

    let flags = t.bridge.store.flags().unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].external_account_id, account);
    assert_eq!(flags[0].observed_sequence, START_SEQUENCE + 2);
    assert_eq!(flags[0].recorded_sequence, START_SEQUENCE + 1);
    assert_eq!(t.recorder.count(LifecycleKind::ReconciliationRequired, Some(&account)), 1);

    let link = t.bridge.linker.get_link("A1").unwrap().unwrap();
    assert!(link.quarantined);
    assert_eq!(link.last_known_sequence, START_SEQUENCE + 1);

    // Quarantined accounts take no new work and are not flagged twice.
    let err = t.bridge.engine.process_event(deposit("e2", "A1", 500)).await.unwrap_err();
    assert!(matches!(err, BridgeError::Linking { .. }));
    let report = t.bridge.listener.tick().await.unwrap();
    assert_eq!(report.flagged, 0);
    assert_eq!(t.bridge.store.flags().unwrap().len(), 1);
}

#[tokio::test]
async fn test_ledger_failure_is_not_flagged_as_foreign_activity() {
    let t = test_bridge();
    t.bridge.engine.process_event(deposit("e1", "A1", 500)).await.unwrap();
    let account = external_account("A1");

    t.network.script([SubmitStep::Fail(RejectionReason::InsufficientBalance)]);
    let failed = t.bridge.engine.process_event(deposit("e2", "A1", 500)).await.unwrap();
    assert_eq!(failed.status, TxStatus::Failed);
    assert_eq!(t.network.sequence(&account), Some(START_SEQUENCE + 2));
    assert_eq!(t.recorder.count(LifecycleKind::PaymentFailed, Some("e2")), 1);

    let report = t.bridge.listener.tick().await.unwrap();
    assert_eq!(report.flagged, 0);
    assert!(t.bridge.store.flags().unwrap().is_empty());
    let link = t.bridge.linker.get_link("A1").unwrap().unwrap();
    assert!(!link.quarantined);
    assert_eq!(link.last_known_sequence, START_SEQUENCE + 2);

    let settled = t.bridge.engine.process_event(deposit("e3", "A1", 500)).await.unwrap();
    assert_eq!(settled.status, TxStatus::Confirmed);
    assert_eq!(settled.sequence_number_used, START_SEQUENCE + 3);
    assert_eq!(t.recorder.count(LifecycleKind::PaymentSettled, Some("e3")), 1);
}

#[tokio::test]
async fn test_tick_resolves_stale_submission() {
    let t = test_bridge();
    let snapshot = t.bridge.config.get().unwrap();
    let link = t.bridge.linker.resolve_or_create_link("A1", &snapshot).await.unwrap();

    let mut record = TransactionBuilder::new(Some(funding_signer()))
        .build(&deposit("e1", "A1", 500), &link, &snapshot)
        .unwrap();
    record.status = TxStatus::Submitted;
    record.attempt_count = 1;
    record.last_attempt_at = Some(0);
    t.bridge.store.put_transaction(&record).unwrap();
    t.bridge.linker.attach_pending("A1", "e1").unwrap();
    let envelope = record.signed_envelope.clone().unwrap();
    assert!(matches!(t.network.apply(&envelope), SubmitOutcome::Accepted { .. }));

    let report = t.bridge.listener.tick().await.unwrap();
    assert_eq!(report.verified, 1);
    // The in-flight transaction explains the sequence; nothing is flagged.
    assert_eq!(report.flagged, 0);

    let record = t.bridge.store.get_transaction("e1").unwrap().unwrap();
    assert_eq!(record.status, TxStatus::Confirmed);
    assert_eq!(t.network.submit_count(), 0);
    assert_eq!(t.recorder.count(LifecycleKind::PaymentSettled, Some("e1")), 1);
}

#[tokio::test]
async fn test_parked_events_replay_after_release() {
    let t = test_bridge();
    let (tx, rx) = mpsc::channel(16);
    let handle = t.bridge.start(rx).await.unwrap();

    tx.send(deposit("e1", "A1", 500)).await.unwrap();
    assert!(t.recorder.wait_for(LifecycleKind::PaymentSettled, Some("e1"), WAIT).await);

    let account = external_account("A1");
    t.network.bump_sequence(&account, 1);
    assert!(
        t.recorder
            .wait_for(LifecycleKind::ReconciliationRequired, Some(&account), WAIT)
            .await
    );

    tx.send(deposit("e2", "A1", 700)).await.unwrap();
    let deadline = tokio::time::Instant::now() + WAIT;
    while t.bridge.service.parked_count("A1") == 0 {
        assert!(tokio::time::Instant::now() < deadline, "event was not parked");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(t.bridge.store.get_transaction("e2").unwrap().is_none());

    let released = t.bridge.service.release_account("A1").await.unwrap().unwrap();
    assert!(!released.quarantined);
    assert_eq!(released.last_known_sequence, START_SEQUENCE + 2);

    assert!(t.recorder.wait_for(LifecycleKind::PaymentSettled, Some("e2"), WAIT).await);
    let record = t.bridge.store.get_transaction("e2").unwrap().unwrap();
    assert_eq!(record.sequence_number_used, START_SEQUENCE + 3);
    assert_eq!(t.bridge.service.parked_count("A1"), 0);

    drop(tx);
    assert!(handle.finish(WAIT).await);
}
