//! Submission engine.
//!
//! # Responsibilities
//! - Turn a ledger event into exactly one external transaction
//! - Submit, classify the outcome and retry within the policy budget
//! - Advance the link sequence exactly once per confirmed transaction
//! - Resume unfinished work after a restart
//!
//! # Design Decisions
//! - The idempotency key is the internal event id. Each event is handled by
//!   one task at a time (an event claim), and every state transition re-reads
//!   the durable record under the account lock first
//! - SUBMITTED is persisted before the envelope leaves the process, so a
//!   crash mid-submission is resolved by a status query, never a blind resend
//! - A timeout is an unknown outcome: the network is asked before retrying
//! - Retries resend the same envelope; only a sequence conflict rebuilds it
//! - A retryable failure is recorded on the still-active record; FAILED and
//!   ABANDONED are terminal
//!
//! # Data Flow
//! ```text
//! LedgerEvent
//!     → claim(event_id) → existing record? → resume it
//!     → linker (link + trustline) → reserve sequence → builder → BUILT
//!     → SUBMITTED → submit ─┬─ accepted ─────────────▶ CONFIRMED
//!                           ├─ rejected ─────────────▶ FAILED
//!                           ├─ bad sequence ─ refresh ▶ BUILT (rebuilt)
//!                           └─ unknown ─ status? ─┬─ confirmed ▶ CONFIRMED
//!                                                 ├─ pending ──▶ SUBMITTED
//!                                                 └─ not found ▶ resend
//! budget spent ──────────────────────────────────────▶ ABANDONED
//! ```

use std::sync::Arc;
use std::time::Instant;

use crate::builder::TransactionBuilder;
use crate::clock::unix_millis;
use crate::config::{ConfigurationStore, VersionedConfiguration};
use crate::engine::locks::AccountLocks;
use crate::engine::sequence::SequenceCursors;
use crate::engine::state::{FailureKind, FailureReason, PendingTransaction, TxStatus};
use crate::error::{BridgeError, BridgeResult, ConfigurationError};
use crate::events::{EventPublisher, LedgerEvent, LifecycleEvent};
use crate::linker::{AccountLink, AccountLinker};
use crate::network::{ExternalTxStatus, NetworkClient, NetworkError, SubmitOutcome};
use crate::observability::metrics;
use crate::resilience::backoff::policy_backoff;
use crate::resilience::retries::{classify_rejection, has_budget, is_retryable, RetryDecision};
use crate::resilience::timeouts::with_deadline;
use crate::store::BridgeStore;

/// Counts from a startup recovery pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// SUBMITTED transactions re-verified.
    pub verified: usize,
    /// BUILT transactions resumed.
    pub resumed: usize,
    /// Transactions whose recovery returned an error.
    pub errors: usize,
}

pub struct SubmissionEngine {
    store: Arc<dyn BridgeStore>,
    linker: Arc<AccountLinker>,
    builder: Arc<TransactionBuilder>,
    network: Arc<dyn NetworkClient>,
    config: Arc<ConfigurationStore>,
    publisher: Arc<dyn EventPublisher>,
    locks: AccountLocks,
    claims: AccountLocks,
    cursors: SequenceCursors,
}

impl SubmissionEngine {
    pub fn new(
        store: Arc<dyn BridgeStore>,
        linker: Arc<AccountLinker>,
        builder: Arc<TransactionBuilder>,
        network: Arc<dyn NetworkClient>,
        config: Arc<ConfigurationStore>,
        publisher: Arc<dyn EventPublisher>,
        locks: AccountLocks,
    ) -> Self {
        Self {
            store,
            linker,
            builder,
            network,
            config,
            publisher,
            locks,
            claims: AccountLocks::new(),
            cursors: SequenceCursors::new(),
        }
    }

    /// Per-account locks shared with the linker and the reconciler.
    pub fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    pub fn linker(&self) -> &Arc<AccountLinker> {
        &self.linker
    }

    /// Drop the cached sequence cursor of an account.
    pub fn invalidate_cursor(&self, external_account_id: &str) {
        self.cursors.invalidate(external_account_id);
    }

    /// Process one ledger event.
    ///
    /// Returns the transaction record for every outcome that leaves it in a
    /// well-defined state. Errors mean the event made no progress (halt,
    /// quarantine, transient) or was abandoned.
    pub async fn process_event(&self, event: LedgerEvent) -> BridgeResult<PendingTransaction> {
        let _claim = self.claims.claim(&event.event_id).await;

        if let Some(existing) = self.store.get_transaction(&event.event_id)? {
            if existing.is_terminal() {
                tracing::debug!(event_id = %event.event_id, status = existing.status.as_str(), "Event already processed");
                metrics::record_event("duplicate");
                return Ok(existing);
            }
            tracing::info!(event_id = %event.event_id, status = existing.status.as_str(), "Resuming redelivered event");
            return self.advance(existing).await;
        }

        let snapshot = self.config.get()?;
        let link = self
            .linker
            .resolve_or_create_link(&event.internal_account_id, &snapshot)
            .await?;
        if link.quarantined {
            return Err(BridgeError::linking(&event.internal_account_id, "account is quarantined"));
        }
        let link = self
            .linker
            .establish_trustline_if_needed(&event.internal_account_id, &snapshot)
            .await?;

        let tx = match self.build_new(&event, &link, &snapshot).await? {
            Built::Ready(tx) => tx,
            Built::Failed(tx) => return Ok(tx),
        };
        self.drive(tx, snapshot).await
    }

    /// Stop retrying an event that never got a transaction record.
    ///
    /// Without a record nothing was sent, so the event is recorded ABANDONED
    /// and `PAYMENT_FAILED` is published; a redelivery then finds the
    /// terminal record and cannot settle. An event that already has an
    /// active record is left to recovery and reconciliation, and a terminal
    /// record is returned as is. Returns the terminal record, if any.
    pub async fn give_up(&self, event: &LedgerEvent, reason: String) -> BridgeResult<Option<PendingTransaction>> {
        let _claim = self.claims.claim(&event.event_id).await;

        if let Some(existing) = self.store.get_transaction(&event.event_id)? {
            if existing.is_terminal() {
                return Ok(Some(existing));
            }
            tracing::warn!(
                event_id = %event.event_id,
                status = existing.status.as_str(),
                "Retries exhausted with an active record, leaving it to reconciliation"
            );
            return Ok(None);
        }

        let external_account_id = self
            .linker
            .get_link(&event.internal_account_id)?
            .map(|link| link.external_account_id)
            .unwrap_or_default();
        let config_version = self.config.get().map(|s| s.version).unwrap_or(0);
        let tx = PendingTransaction {
            internal_event_id: event.event_id.clone(),
            internal_account_id: event.internal_account_id.clone(),
            external_account_id,
            direction: event.direction,
            asset: event.asset.clone(),
            amount: event.amount,
            sequence_number_used: 0,
            signed_envelope: None,
            tx_hash: None,
            status: TxStatus::Abandoned,
            attempt_count: 0,
            last_attempt_at: None,
            config_version,
            failure: Some(FailureReason {
                kind: FailureKind::Transient,
                reason,
                retryable: false,
            }),
        };
        self.store.put_transaction(&tx)?;

        tracing::error!(event_id = %tx.internal_event_id, "Event abandoned before submission");
        self.publisher.publish(LifecycleEvent::payment_failed(&tx.internal_event_id));
        metrics::record_event("abandoned");
        Ok(Some(tx))
    }

    /// Re-check a SUBMITTED transaction against the network. A transaction
    /// another task is working on is returned unchanged.
    pub async fn verify_submitted(&self, tx: PendingTransaction) -> BridgeResult<PendingTransaction> {
        let Some(_claim) = self.claims.try_claim(&tx.internal_event_id) else {
            return Ok(tx);
        };
        let current = self.store.get_transaction(&tx.internal_event_id)?.unwrap_or(tx);
        self.advance(current).await
    }

    /// Resolve unfinished work from a previous run: SUBMITTED first, by
    /// status query, then BUILT by submission.
    pub async fn recover(&self) -> BridgeResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut work = self.store.transactions_with_status(TxStatus::Submitted)?;
        report.verified = work.len();
        let built = self.store.transactions_with_status(TxStatus::Built)?;
        report.resumed = built.len();
        work.extend(built);

        for tx in work {
            let event_id = tx.internal_event_id.clone();
            let _claim = self.claims.claim(&event_id).await;
            let current = self.store.get_transaction(&event_id)?.unwrap_or(tx);
            match self.advance(current).await {
                Ok(tx) => {
                    tracing::info!(event_id = %event_id, status = tx.status.as_str(), "Recovered transaction")
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(event_id = %event_id, error = %e, "Recovery failed");
                    if matches!(e, BridgeError::Configuration(_) | BridgeError::Store(_)) {
                        return Err(e);
                    }
                }
            }
        }

        tracing::info!(
            verified = report.verified,
            resumed = report.resumed,
            errors = report.errors,
            "Recovery complete"
        );
        Ok(report)
    }

    /// Move a claimed, non-new record forward from its current status.
    async fn advance(&self, tx: PendingTransaction) -> BridgeResult<PendingTransaction> {
        match tx.status {
            TxStatus::Confirmed | TxStatus::Failed | TxStatus::Abandoned => Ok(tx),
            TxStatus::Submitted => self.check_status(tx).await,
            TxStatus::Built => {
                let snapshot = self.snapshot_for(&tx)?;
                self.drive(tx, snapshot).await
            }
        }
    }

    /// The configuration a transaction was built under, or the current one
    /// when that version is gone.
    fn snapshot_for(&self, tx: &PendingTransaction) -> Result<Arc<VersionedConfiguration>, ConfigurationError> {
        match self.config.version(tx.config_version) {
            Some(snapshot) => Ok(snapshot),
            None => self.config.get(),
        }
    }

    async fn check_status(&self, tx: PendingTransaction) -> BridgeResult<PendingTransaction> {
        let Some(hash) = tx.tx_hash.clone() else {
            return self
                .fail(tx, FailureKind::Irrecoverable, "submitted without a hash".to_string(), false)
                .await;
        };

        match self.network.get_transaction_status(&hash).await {
            Ok(ExternalTxStatus::Confirmed { ledger }) => self.commit_confirmed(tx, ledger).await,
            Ok(ExternalTxStatus::Failed { ledger }) => {
                self.fail(tx, FailureKind::Rejected, format!("failed in ledger {}", ledger), true)
                    .await
            }
            Ok(ExternalTxStatus::Pending) => {
                tracing::debug!(event_id = %tx.internal_event_id, tx_hash = %hash, "Transaction still pending");
                Ok(tx)
            }
            Ok(ExternalTxStatus::NotFound) => {
                let snapshot = self.snapshot_for(&tx)?;
                let tx = self
                    .record_retryable(tx, FailureKind::Transient, "not found on network".to_string())
                    .await?;
                if !has_budget(&snapshot.retry_policy, tx.attempt_count) {
                    return self.abandon(tx).await;
                }
                tracing::info!(event_id = %tx.internal_event_id, tx_hash = %hash, "Resubmitting unseen transaction");
                self.drive(tx, snapshot).await
            }
            Err(e) => {
                tracing::warn!(event_id = %tx.internal_event_id, error = %e, "Status query failed");
                Ok(tx)
            }
        }
    }

    /// Reserve a sequence and persist the BUILT record, or record why the
    /// event cannot be built.
    async fn build_new(
        &self,
        event: &LedgerEvent,
        link: &AccountLink,
        snapshot: &Arc<VersionedConfiguration>,
    ) -> BridgeResult<Built> {
        let account = link.external_account_id.clone();
        let _guard = self.locks.lock(&account).await;
        let link = self.linker.get_link(&link.internal_account_id)?.unwrap_or_else(|| link.clone());

        let sequence = self.cursors.reserve(&account, link.last_known_sequence);
        match self.builder.build_with_sequence(event, &link, sequence, snapshot) {
            Ok(tx) => {
                if let Err(e) = self.persist_new(&tx) {
                    self.cursors.release(&account, sequence, false);
                    return Err(e);
                }
                tracing::info!(
                    event_id = %tx.internal_event_id,
                    account = %account,
                    sequence = sequence,
                    tx_hash = tx.tx_hash.as_deref().unwrap_or_default(),
                    "Transaction built"
                );
                Ok(Built::Ready(tx))
            }
            Err(BridgeError::Build(e)) => {
                self.cursors.release(&account, sequence, false);
                let tx = self.record_unbuildable(event, &link, snapshot, FailureKind::InvalidEvent, e.to_string())?;
                Ok(Built::Failed(tx))
            }
            Err(BridgeError::Configuration(ConfigurationError::Signing(reason))) => {
                self.cursors.release(&account, sequence, false);
                self.record_unbuildable(event, &link, snapshot, FailureKind::Signing, reason.clone())?;
                Err(ConfigurationError::Signing(reason).into())
            }
            Err(e) => {
                self.cursors.release(&account, sequence, false);
                Err(e)
            }
        }
    }

    fn persist_new(&self, tx: &PendingTransaction) -> BridgeResult<()> {
        self.store.put_transaction(tx)?;
        self.linker.attach_pending(&tx.internal_account_id, &tx.internal_event_id)?;
        Ok(())
    }

    fn record_unbuildable(
        &self,
        event: &LedgerEvent,
        link: &AccountLink,
        snapshot: &VersionedConfiguration,
        kind: FailureKind,
        reason: String,
    ) -> BridgeResult<PendingTransaction> {
        tracing::warn!(event_id = %event.event_id, reason = %reason, "Event cannot be built");
        let tx = PendingTransaction {
            internal_event_id: event.event_id.clone(),
            internal_account_id: event.internal_account_id.clone(),
            external_account_id: link.external_account_id.clone(),
            direction: event.direction,
            asset: event.asset.clone(),
            amount: event.amount,
            sequence_number_used: 0,
            signed_envelope: None,
            tx_hash: None,
            status: TxStatus::Failed,
            attempt_count: 0,
            last_attempt_at: None,
            config_version: snapshot.version,
            failure: Some(FailureReason::new(kind, reason)),
        };
        self.store.put_transaction(&tx)?;
        self.publisher.publish(LifecycleEvent::payment_failed(&tx.internal_event_id));
        metrics::record_event("failed");
        Ok(tx)
    }

    /// Submit until the transaction is terminal or its outcome is pending.
    async fn drive(
        &self,
        mut tx: PendingTransaction,
        snapshot: Arc<VersionedConfiguration>,
    ) -> BridgeResult<PendingTransaction> {
        let policy = snapshot.retry_policy.clone();
        loop {
            tx = match self.mark_submitted(tx).await? {
                Marked::Ready(tx) => tx,
                Marked::Done(tx) => return Ok(tx),
            };
            let Some(envelope) = tx.signed_envelope.clone() else {
                return self
                    .fail(tx, FailureKind::Irrecoverable, "no envelope to submit".to_string(), false)
                    .await;
            };

            let started = Instant::now();
            let result = with_deadline(snapshot.submission_timeout(), self.network.submit(&envelope)).await;

            let failure = match result {
                Ok(SubmitOutcome::Accepted { ledger, .. }) => {
                    metrics::record_submission("accepted", started.elapsed());
                    return self.commit_confirmed(tx, ledger).await;
                }
                Ok(SubmitOutcome::Rejected(reason)) => match classify_rejection(&reason) {
                    RetryDecision::Rebuild => {
                        metrics::record_submission("bad_sequence", started.elapsed());
                        // An earlier attempt may have landed and consumed the sequence.
                        match self.network.get_transaction_status(&envelope.hash).await {
                            Ok(ExternalTxStatus::Confirmed { ledger }) => return self.commit_confirmed(tx, ledger).await,
                            Ok(ExternalTxStatus::Failed { ledger }) => {
                                return self
                                    .fail(tx, FailureKind::Rejected, format!("failed in ledger {}", ledger), true)
                                    .await
                            }
                            _ => {}
                        }
                        Retry::Rebuild(reason.to_string())
                    }
                    _ => {
                        metrics::record_submission("rejected", started.elapsed());
                        return self.fail(tx, FailureKind::Rejected, reason.to_string(), false).await;
                    }
                },
                Ok(SubmitOutcome::Failed(reason)) => {
                    metrics::record_submission("failed", started.elapsed());
                    return self.fail(tx, FailureKind::Rejected, reason.to_string(), true).await;
                }
                Err(NetworkError::Configuration(reason)) => {
                    metrics::record_submission("error", started.elapsed());
                    // Nothing left the process; the record resumes once the configuration changes.
                    return Err(ConfigurationError::Invalid(reason).into());
                }
                Err(e) => {
                    metrics::record_submission(network_result(&e), started.elapsed());
                    if !is_retryable(&e) {
                        return self.fail(tx, FailureKind::Irrecoverable, e.to_string(), false).await;
                    }
                    tracing::warn!(
                        event_id = %tx.internal_event_id,
                        attempt = tx.attempt_count,
                        error = %e,
                        "Submission outcome unknown, querying status"
                    );
                    match self.network.get_transaction_status(&envelope.hash).await {
                        Ok(ExternalTxStatus::Confirmed { ledger }) => return self.commit_confirmed(tx, ledger).await,
                        Ok(ExternalTxStatus::Failed { ledger }) => {
                            return self
                                .fail(tx, FailureKind::Rejected, format!("failed in ledger {}", ledger), true)
                                .await
                        }
                        Ok(ExternalTxStatus::Pending) => {
                            tracing::info!(event_id = %tx.internal_event_id, "Submission pending, leaving for reconciliation");
                            return Ok(tx);
                        }
                        Ok(ExternalTxStatus::NotFound) => Retry::Resend(e.to_string()),
                        Err(query) => Retry::Resend(format!("{}; status query failed: {}", e, query)),
                    }
                }
            };

            let (kind, reason) = match &failure {
                Retry::Resend(reason) => (FailureKind::Transient, reason.clone()),
                Retry::Rebuild(reason) => (FailureKind::SequenceConflict, reason.clone()),
            };
            tx = self.record_retryable(tx, kind, reason).await?;
            if !has_budget(&policy, tx.attempt_count) {
                return self.abandon(tx).await;
            }

            let delay = policy_backoff(&policy, tx.attempt_count);
            tracing::info!(
                event_id = %tx.internal_event_id,
                attempt = tx.attempt_count,
                delay_ms = delay.as_millis() as u64,
                "Retrying submission"
            );
            tokio::time::sleep(delay).await;

            if let Retry::Rebuild(_) = failure {
                let account = tx.external_account_id.clone();
                tx = match self.rebuild(tx, &snapshot).await {
                    Ok(tx) => tx,
                    Err(BridgeError::TransientNetwork(reason)) => {
                        return Err(BridgeError::SequenceConflict {
                            account,
                            detail: format!("sequence refresh failed: {}", reason),
                        })
                    }
                    Err(e) => return Err(e),
                };
            }
        }
    }

    /// BUILT/SUBMITTED → SUBMITTED with one more attempt, persisted before
    /// the envelope is sent.
    async fn mark_submitted(&self, tx: PendingTransaction) -> BridgeResult<Marked> {
        let _guard = self.locks.lock(&tx.external_account_id).await;
        let mut current = self.store.get_transaction(&tx.internal_event_id)?.unwrap_or(tx);
        if current.is_terminal() {
            return Ok(Marked::Done(current));
        }
        current.status = TxStatus::Submitted;
        current.attempt_count += 1;
        current.last_attempt_at = Some(unix_millis());
        self.store.put_transaction(&current)?;
        tracing::info!(
            event_id = %current.internal_event_id,
            account = %current.external_account_id,
            sequence = current.sequence_number_used,
            attempt = current.attempt_count,
            "Submitting transaction"
        );
        Ok(Marked::Ready(current))
    }

    /// SUBMITTED → CONFIRMED. Idempotent.
    async fn commit_confirmed(&self, tx: PendingTransaction, ledger: u64) -> BridgeResult<PendingTransaction> {
        let _guard = self.locks.lock(&tx.external_account_id).await;
        let mut current = self.store.get_transaction(&tx.internal_event_id)?.unwrap_or(tx);
        if current.status == TxStatus::Confirmed {
            return Ok(current);
        }

        match self
            .linker
            .advance_sequence(&current.external_account_id, current.sequence_number_used)
        {
            Ok(_) => {}
            Err(BridgeError::SequenceRegression { stored, proposed, .. }) => {
                tracing::warn!(
                    event_id = %current.internal_event_id,
                    stored = stored,
                    proposed = proposed,
                    "Link already past confirmed sequence"
                );
            }
            Err(e) => return Err(e),
        }

        current.status = TxStatus::Confirmed;
        current.failure = None;
        self.store.put_transaction(&current)?;
        self.linker
            .detach_pending(&current.internal_account_id, &current.internal_event_id)?;

        tracing::info!(
            event_id = %current.internal_event_id,
            account = %current.external_account_id,
            sequence = current.sequence_number_used,
            ledger = ledger,
            attempts = current.attempt_count,
            "Payment settled"
        );
        self.publisher
            .publish(LifecycleEvent::payment_settled(&current.internal_event_id));
        metrics::record_event("settled");
        Ok(current)
    }

    /// → FAILED. `consumed` tells whether the network used the sequence.
    async fn fail(
        &self,
        tx: PendingTransaction,
        kind: FailureKind,
        reason: String,
        consumed: bool,
    ) -> BridgeResult<PendingTransaction> {
        let _guard = self.locks.lock(&tx.external_account_id).await;
        let mut current = self.store.get_transaction(&tx.internal_event_id)?.unwrap_or(tx);
        if current.is_terminal() {
            return Ok(current);
        }

        if consumed {
            if let Err(e) = self
                .linker
                .advance_sequence(&current.external_account_id, current.sequence_number_used)
            {
                tracing::warn!(event_id = %current.internal_event_id, error = %e, "Could not record consumed sequence");
            }
        }
        self.cursors
            .release(&current.external_account_id, current.sequence_number_used, consumed);

        current.status = TxStatus::Failed;
        current.failure = Some(FailureReason {
            kind,
            reason: reason.clone(),
            retryable: false,
        });
        self.store.put_transaction(&current)?;
        self.linker
            .detach_pending(&current.internal_account_id, &current.internal_event_id)?;

        tracing::warn!(
            event_id = %current.internal_event_id,
            account = %current.external_account_id,
            reason = %reason,
            "Payment failed"
        );
        self.publisher
            .publish(LifecycleEvent::payment_failed(&current.internal_event_id));
        metrics::record_event("failed");
        Ok(current)
    }

    /// → ABANDONED after the retry budget is spent.
    async fn abandon(&self, tx: PendingTransaction) -> BridgeResult<PendingTransaction> {
        let event_id = tx.internal_event_id.clone();
        let attempts = tx.attempt_count;
        {
            let _guard = self.locks.lock(&tx.external_account_id).await;
            let mut current = self.store.get_transaction(&tx.internal_event_id)?.unwrap_or(tx);
            if current.is_terminal() {
                return Ok(current);
            }
            let last = current
                .failure
                .as_ref()
                .map(|f| f.reason.clone())
                .unwrap_or_default();

            // Whether the sequence was consumed is unknown; reseed next time.
            self.cursors.invalidate(&current.external_account_id);
            current.status = TxStatus::Abandoned;
            current.failure = Some(FailureReason {
                kind: FailureKind::Irrecoverable,
                reason: format!("retry budget exhausted after {} attempts: {}", attempts, last),
                retryable: false,
            });
            self.store.put_transaction(&current)?;
            self.linker
                .detach_pending(&current.internal_account_id, &current.internal_event_id)?;
        }

        tracing::error!(event_id = %event_id, attempts = attempts, "Submission abandoned");
        self.publisher.publish(LifecycleEvent::payment_failed(&event_id));
        metrics::record_event("abandoned");
        Err(BridgeError::IrrecoverableSubmission {
            event_id,
            reason: format!("retry budget exhausted after {} attempts", attempts),
        })
    }

    /// Note a retryable failure on the still-active record.
    async fn record_retryable(
        &self,
        tx: PendingTransaction,
        kind: FailureKind,
        reason: String,
    ) -> BridgeResult<PendingTransaction> {
        let _guard = self.locks.lock(&tx.external_account_id).await;
        let mut current = self.store.get_transaction(&tx.internal_event_id)?.unwrap_or(tx);
        if !current.is_terminal() {
            current.failure = Some(FailureReason::new(kind, reason));
            self.store.put_transaction(&current)?;
        }
        Ok(current)
    }

    /// Refresh the account sequence from the network and rebuild the
    /// envelope with a new reservation. The record returns to BUILT.
    async fn rebuild(
        &self,
        tx: PendingTransaction,
        snapshot: &VersionedConfiguration,
    ) -> BridgeResult<PendingTransaction> {
        let account = tx.external_account_id.clone();
        let network_sequence = self.network.get_account_sequence(&account).await?;

        let _guard = self.locks.lock(&account).await;
        let link = self
            .linker
            .get_link(&tx.internal_account_id)?
            .ok_or_else(|| BridgeError::linking(&tx.internal_account_id, "link disappeared during rebuild"))?;

        if network_sequence + 1 < tx.sequence_number_used && self.has_earlier_in_flight(&link, &tx)? {
            tracing::debug!(
                event_id = %tx.internal_event_id,
                sequence = tx.sequence_number_used,
                network_sequence = network_sequence,
                "Waiting for earlier transactions of the account"
            );
            return Ok(tx);
        }

        self.cursors
            .catch_up(&account, network_sequence.max(link.last_known_sequence));
        let sequence = self.cursors.reserve(&account, link.last_known_sequence);

        let mut rebuilt = match self.builder.build_with_sequence(&tx.event(), &link, sequence, snapshot) {
            Ok(rebuilt) => rebuilt,
            Err(e) => {
                self.cursors.release(&account, sequence, false);
                return Err(e);
            }
        };
        rebuilt.attempt_count = tx.attempt_count;
        rebuilt.last_attempt_at = tx.last_attempt_at;
        rebuilt.failure = tx.failure.clone();
        self.store.put_transaction(&rebuilt)?;

        tracing::info!(
            event_id = %rebuilt.internal_event_id,
            account = %account,
            old_sequence = tx.sequence_number_used,
            new_sequence = sequence,
            network_sequence = network_sequence,
            "Rebuilt transaction after sequence conflict"
        );
        Ok(rebuilt)
    }
}

impl SubmissionEngine {
    /// Whether another active transaction of the same link holds a lower
    /// sequence and may still land.
    fn has_earlier_in_flight(&self, link: &AccountLink, tx: &PendingTransaction) -> BridgeResult<bool> {
        for event_id in &link.pending_event_ids {
            if *event_id == tx.internal_event_id {
                continue;
            }
            if let Some(other) = self.store.get_transaction(event_id)? {
                if !other.is_terminal() && other.sequence_number_used < tx.sequence_number_used {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

impl std::fmt::Debug for SubmissionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionEngine")
            .field("active_claims", &self.claims.len())
            .finish_non_exhaustive()
    }
}

enum Built {
    Ready(PendingTransaction),
    Failed(PendingTransaction),
}

enum Marked {
    Ready(PendingTransaction),
    Done(PendingTransaction),
}

enum Retry {
    Resend(String),
    Rebuild(String),
}

fn network_result(e: &NetworkError) -> &'static str {
    match e {
        NetworkError::Timeout(_) => "timeout",
        NetworkError::Transport(_) => "transport",
        NetworkError::AccountNotFound(_) | NetworkError::Protocol(_) | NetworkError::Configuration(_) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{strkey, FundingSigner};
    use crate::config::{BridgeConfiguration, RetryPolicy, SYSTEM_PRINCIPAL};
    use crate::events::{Direction, EventRecorder, LifecycleKind};
    use crate::linker::DerivedAccountProvisioner;
    use crate::network::{RejectionReason, ScriptedNetwork, SubmitStep};
    use crate::store::MemoryStore;

    struct Fixture {
        engine: SubmissionEngine,
        network: Arc<ScriptedNetwork>,
        store: Arc<MemoryStore>,
        recorder: Arc<EventRecorder>,
        config: Arc<ConfigurationStore>,
        builder: Arc<TransactionBuilder>,
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    fn fixture_with(policy: RetryPolicy, signer: Option<Arc<FundingSigner>>) -> Fixture {
        let funding = FundingSigner::from_seed(&[1u8; 32]);
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(EventRecorder::new());
        let config = Arc::new(ConfigurationStore::open(store.clone(), recorder.clone(), Vec::new()).unwrap());
        let mut configuration = BridgeConfiguration::new(funding.account_id(), "https://horizon.example")
            .with_asset("USD", strkey::encode_account_id(&[9u8; 32]));
        configuration.retry_policy = policy;
        config.set(SYSTEM_PRINCIPAL, configuration).unwrap();

        let network = Arc::new(ScriptedNetwork::with_default_sequence(100));
        let builder = Arc::new(TransactionBuilder::new(signer));
        let locks = AccountLocks::new();
        let linker = Arc::new(AccountLinker::new(
            store.clone(),
            network.clone(),
            Arc::new(DerivedAccountProvisioner),
            builder.clone(),
            locks.clone(),
        ));
        let engine = SubmissionEngine::new(
            store.clone(),
            linker,
            builder.clone(),
            network.clone(),
            config.clone(),
            recorder.clone(),
            locks,
        );
        Fixture {
            engine,
            network,
            store,
            recorder,
            config,
            builder,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(fast_policy(5), Some(Arc::new(FundingSigner::from_seed(&[1u8; 32]))))
    }

    fn deposit(event_id: &str, amount: i64) -> LedgerEvent {
        LedgerEvent {
            event_id: event_id.to_string(),
            internal_account_id: "A1".to_string(),
            amount,
            asset: "USD".to_string(),
            direction: Direction::Deposit,
        }
    }

    fn link_sequence(f: &Fixture) -> u64 {
        f.engine.linker().get_link("A1").unwrap().unwrap().last_known_sequence
    }

    #[tokio::test]
    async fn test_settles_once() {
        let f = fixture();
        let tx = f.engine.process_event(deposit("e1", 500)).await.unwrap();
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.sequence_number_used, 101);
        assert_eq!(tx.attempt_count, 1);
        assert_eq!(link_sequence(&f), 101);
        assert_eq!(f.recorder.count(LifecycleKind::PaymentSettled, Some("e1")), 1);

        // Trustline plus payment.
        assert_eq!(f.network.submit_count(), 2);
        let queries = f.network.status_query_count();

        let again = f.engine.process_event(deposit("e1", 500)).await.unwrap();
        assert_eq!(again, tx);
        assert_eq!(f.network.submit_count(), 2);
        assert_eq!(f.network.status_query_count(), queries);
        assert_eq!(f.recorder.count(LifecycleKind::PaymentSettled, Some("e1")), 1);
        assert!(f.engine.linker().get_link("A1").unwrap().unwrap().pending_event_ids.is_empty());
    }

    #[tokio::test]
    async fn test_timeouts_then_rejection_fail_once() {
        let f = fixture();
        f.network.script([
            SubmitStep::Apply,
            SubmitStep::Timeout { applied: false },
            SubmitStep::Timeout { applied: false },
            SubmitStep::Timeout { applied: false },
            SubmitStep::Reject(RejectionReason::InsufficientBalance),
        ]);

        let tx = f.engine.process_event(deposit("e2", 500)).await.unwrap();
        assert_eq!(tx.status, TxStatus::Failed);
        assert_eq!(tx.attempt_count, 4);
        let failure = tx.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Rejected);
        assert!(!failure.retryable);

        assert_eq!(f.recorder.count(LifecycleKind::PaymentFailed, Some("e2")), 1);
        assert_eq!(f.recorder.count(LifecycleKind::PaymentSettled, None), 0);
        assert_eq!(link_sequence(&f), 100);

        // Every retry resent the same envelope.
        let submitted = f.network.submitted();
        assert!(submitted[1..].iter().all(|h| *h == submitted[1]));
    }

    #[tokio::test]
    async fn test_timeout_that_landed_is_confirmed_without_resend() {
        let f = fixture();
        f.network.script([SubmitStep::Apply, SubmitStep::Timeout { applied: true }]);

        let tx = f.engine.process_event(deposit("e1", 500)).await.unwrap();
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(f.network.submit_count(), 2);
        assert_eq!(link_sequence(&f), 101);
    }

    #[tokio::test]
    async fn test_rejection_does_not_consume_sequence() {
        let f = fixture();
        f.network
            .script([SubmitStep::Apply, SubmitStep::Reject(RejectionReason::BadAuth)]);

        let failed = f.engine.process_event(deposit("e1", 500)).await.unwrap();
        assert_eq!(failed.status, TxStatus::Failed);
        assert_eq!(failed.sequence_number_used, 101);

        let next = f.engine.process_event(deposit("e2", 500)).await.unwrap();
        assert_eq!(next.status, TxStatus::Confirmed);
        assert_eq!(next.sequence_number_used, 101);
        assert_eq!(link_sequence(&f), 101);
    }

    #[tokio::test]
    async fn test_ledger_failure_consumes_sequence() {
        let f = fixture();
        f.engine.process_event(deposit("e1", 500)).await.unwrap();
        f.network
            .script([SubmitStep::Fail(RejectionReason::InsufficientBalance)]);

        let failed = f.engine.process_event(deposit("e2", 500)).await.unwrap();
        assert_eq!(failed.status, TxStatus::Failed);
        assert_eq!(failed.sequence_number_used, 102);
        assert_eq!(link_sequence(&f), 102);

        let next = f.engine.process_event(deposit("e3", 500)).await.unwrap();
        assert_eq!(next.status, TxStatus::Confirmed);
        assert_eq!(next.sequence_number_used, 103);
        assert_eq!(next.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_sequence_conflict_rebuilds() {
        let f = fixture();
        f.engine.process_event(deposit("e1", 500)).await.unwrap();
        let account = f.engine.linker().get_link("A1").unwrap().unwrap().external_account_id;
        f.network.bump_sequence(&account, 2);

        let tx = f.engine.process_event(deposit("e2", 500)).await.unwrap();
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.sequence_number_used, 104);
        assert_eq!(tx.attempt_count, 2);
        assert_eq!(link_sequence(&f), 104);
    }

    #[tokio::test]
    async fn test_failed_refresh_names_the_linked_account() {
        let f = fixture();
        f.engine.process_event(deposit("e1", 500)).await.unwrap();
        let account = f.engine.linker().get_link("A1").unwrap().unwrap().external_account_id;

        f.network.script([SubmitStep::Reject(RejectionReason::BadSequence)]);
        f.network.merge_account(&account);

        match f.engine.process_event(deposit("e2", 500)).await.unwrap_err() {
            BridgeError::SequenceConflict { account: conflicted, .. } => assert_eq!(conflicted, account),
            other => panic!("unexpected error {:?}", other),
        }
        let tx = f.store.get_transaction("e2").unwrap().unwrap();
        assert!(!tx.is_terminal());
    }

    #[tokio::test]
    async fn test_budget_exhausted_abandons() {
        let f = fixture_with(fast_policy(2), Some(Arc::new(FundingSigner::from_seed(&[1u8; 32]))));
        f.network
            .script([SubmitStep::Apply, SubmitStep::TransportError, SubmitStep::TransportError]);

        let err = f.engine.process_event(deposit("e1", 500)).await.unwrap_err();
        assert!(matches!(err, BridgeError::IrrecoverableSubmission { .. }));

        let tx = f.store.get_transaction("e1").unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Abandoned);
        assert_eq!(tx.attempt_count, 2);
        assert_eq!(f.recorder.count(LifecycleKind::PaymentFailed, Some("e1")), 1);

        // Terminal: a redelivery does nothing.
        let again = f.engine.process_event(deposit("e1", 500)).await.unwrap();
        assert_eq!(again.status, TxStatus::Abandoned);
        assert_eq!(f.network.submit_count(), 3);
    }

    #[tokio::test]
    async fn test_invalid_event_recorded_failed() {
        let f = fixture();
        let tx = f.engine.process_event(deposit("e1", 0)).await.unwrap();
        assert_eq!(tx.status, TxStatus::Failed);
        assert_eq!(tx.failure.unwrap().kind, FailureKind::InvalidEvent);
        assert!(tx.signed_envelope.is_none());
        assert_eq!(f.recorder.count(LifecycleKind::PaymentFailed, Some("e1")), 1);

        // The reservation was handed back.
        let next = f.engine.process_event(deposit("e2", 10)).await.unwrap();
        assert_eq!(next.sequence_number_used, 101);
    }

    #[tokio::test]
    async fn test_missing_signer_halts() {
        let f = fixture_with(fast_policy(5), None);
        // No signer means the trustline cannot be built either.
        let err = f.engine.process_event(deposit("e1", 500)).await.unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(ConfigurationError::Signing(_))));
        assert_eq!(err.scope(), crate::error::ErrorScope::Halt);
    }

    #[tokio::test]
    async fn test_recover_confirms_landed_submission() {
        let f = fixture();
        let snapshot = f.config.get().unwrap();
        let link = f.engine.linker().resolve_or_create_link("A1", &snapshot).await.unwrap();

        // A previous process sent the envelope and crashed before recording
        // the outcome.
        let mut tx = f.builder.build(&deposit("e3", 500), &link, &snapshot).unwrap();
        tx.status = TxStatus::Submitted;
        tx.attempt_count = 1;
        f.store.put_transaction(&tx).unwrap();
        f.engine.linker().attach_pending("A1", "e3").unwrap();
        let envelope = tx.signed_envelope.clone().unwrap();
        assert!(matches!(f.network.apply(&envelope), SubmitOutcome::Accepted { .. }));

        let report = f.engine.recover().await.unwrap();
        assert_eq!(report.verified, 1);
        assert_eq!(report.errors, 0);

        let recovered = f.store.get_transaction("e3").unwrap().unwrap();
        assert_eq!(recovered.status, TxStatus::Confirmed);
        assert_eq!(recovered.attempt_count, 1);
        assert_eq!(f.network.submit_count(), 0);
        assert_eq!(link_sequence(&f), 101);
        assert_eq!(f.recorder.count(LifecycleKind::PaymentSettled, Some("e3")), 1);
    }

    #[tokio::test]
    async fn test_verify_leaves_pending_submission() {
        let f = fixture();
        let snapshot = f.config.get().unwrap();
        let link = f.engine.linker().resolve_or_create_link("A1", &snapshot).await.unwrap();
        let mut tx = f.builder.build(&deposit("e4", 500), &link, &snapshot).unwrap();
        tx.status = TxStatus::Submitted;
        f.store.put_transaction(&tx).unwrap();
        f.network
            .set_status(tx.tx_hash.as_deref().unwrap(), ExternalTxStatus::Pending);

        let checked = f.engine.verify_submitted(tx.clone()).await.unwrap();
        assert_eq!(checked.status, TxStatus::Submitted);
        assert_eq!(f.network.submit_count(), 0);
    }
}
