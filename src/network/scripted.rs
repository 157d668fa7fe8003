//! In-memory network with scripted submission behavior.
//!
//! Applies envelopes the way the real ledger does: an envelope is accepted
//! only when its sequence is the source account's next one, and acceptance
//! consumes that sequence. Scripted steps inject timeouts, rejections and
//! transport failures in front of that behavior. Used by the test suite and
//! by the daemon's `--dry-run` mode.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::builder::SignedEnvelope;
use crate::network::client::NetworkClient;
use crate::network::types::{ExternalTxStatus, NetworkError, RejectionReason, SubmitOutcome};

/// What the next `submit` call does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitStep {
    /// Behave like the ledger.
    Apply,
    /// Time out; with `applied` the envelope still lands.
    Timeout { applied: bool },
    /// Refuse without applying.
    Reject(RejectionReason),
    /// Include in a ledger as failed (`tx_failed`): the sequence is consumed,
    /// the payment is not.
    Fail(RejectionReason),
    /// Connection failure before anything is sent.
    TransportError,
}

#[derive(Debug, Default)]
struct LedgerState {
    sequences: HashMap<String, u64>,
    default_sequence: Option<u64>,
    merged: HashSet<String>,
    script: VecDeque<SubmitStep>,
    applied: HashMap<String, u64>,
    status_overrides: HashMap<String, ExternalTxStatus>,
    submitted: Vec<String>,
    status_queries: usize,
    ledger: u64,
}

impl LedgerState {
    fn sequence_of(&self, account_id: &str) -> Option<u64> {
        if self.merged.contains(account_id) {
            return None;
        }
        self.sequences.get(account_id).copied().or(self.default_sequence)
    }

    fn apply(&mut self, envelope: &SignedEnvelope) -> SubmitOutcome {
        self.include(envelope, None)
    }

    /// Consume the envelope's sequence; with `failure` the transaction lands
    /// as failed.
    fn include(&mut self, envelope: &SignedEnvelope, failure: Option<RejectionReason>) -> SubmitOutcome {
        let Some((source, sequence)) = envelope.source_and_sequence() else {
            return SubmitOutcome::Rejected(RejectionReason::Malformed("undecodable envelope".to_string()));
        };
        let Some(current) = self.sequence_of(&source) else {
            return SubmitOutcome::Rejected(RejectionReason::Other("tx_no_source_account".to_string()));
        };
        if sequence != current + 1 {
            return SubmitOutcome::Rejected(RejectionReason::BadSequence);
        }
        self.sequences.insert(source, sequence);
        self.ledger += 1;
        if let Some(reason) = failure {
            self.status_overrides
                .insert(envelope.hash.clone(), ExternalTxStatus::Failed { ledger: self.ledger });
            return SubmitOutcome::Failed(reason);
        }
        self.applied.insert(envelope.hash.clone(), self.ledger);
        SubmitOutcome::Accepted {
            hash: envelope.hash.clone(),
            ledger: self.ledger,
        }
    }
}

/// Scripted stand-in for the external network.
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    state: Mutex<LedgerState>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts not set explicitly start at `sequence`.
    pub fn with_default_sequence(sequence: u64) -> Self {
        let network = Self::new();
        network.lock().default_sequence = Some(sequence);
        network
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_sequence(&self, account_id: &str, sequence: u64) {
        self.lock().sequences.insert(account_id.to_string(), sequence);
    }

    pub fn sequence(&self, account_id: &str) -> Option<u64> {
        self.lock().sequence_of(account_id)
    }

    /// Consume `count` sequence numbers outside the bridge.
    pub fn bump_sequence(&self, account_id: &str, count: u64) {
        let mut state = self.lock();
        let current = state.sequence_of(account_id).unwrap_or(0);
        state.sequences.insert(account_id.to_string(), current + count);
    }

    /// Remove an account from the ledger, as an account merge would.
    pub fn merge_account(&self, account_id: &str) {
        let mut state = self.lock();
        state.sequences.remove(account_id);
        state.merged.insert(account_id.to_string());
    }

    /// Queue steps for the next submissions, in order.
    pub fn script(&self, steps: impl IntoIterator<Item = SubmitStep>) {
        self.lock().script.extend(steps);
    }

    /// Force the status reported for a hash.
    pub fn set_status(&self, hash: &str, status: ExternalTxStatus) {
        self.lock().status_overrides.insert(hash.to_string(), status);
    }

    /// Apply an envelope directly, as if submitted by an earlier process.
    pub fn apply(&self, envelope: &SignedEnvelope) -> SubmitOutcome {
        self.lock().apply(envelope)
    }

    /// Number of `submit` calls so far.
    pub fn submit_count(&self) -> usize {
        self.lock().submitted.len()
    }

    /// Hashes passed to `submit`, in call order.
    pub fn submitted(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    pub fn is_applied(&self, hash: &str) -> bool {
        self.lock().applied.contains_key(hash)
    }

    pub fn applied_count(&self) -> usize {
        self.lock().applied.len()
    }

    pub fn status_query_count(&self) -> usize {
        self.lock().status_queries
    }
}

#[async_trait]
impl NetworkClient for ScriptedNetwork {
    async fn submit(&self, envelope: &SignedEnvelope) -> Result<SubmitOutcome, NetworkError> {
        let mut state = self.lock();
        state.submitted.push(envelope.hash.clone());
        let step = state.script.pop_front().unwrap_or(SubmitStep::Apply);
        match step {
            SubmitStep::Apply => Ok(state.apply(envelope)),
            SubmitStep::Timeout { applied } => {
                if applied {
                    state.apply(envelope);
                }
                Err(NetworkError::Timeout(0))
            }
            SubmitStep::Reject(reason) => Ok(SubmitOutcome::Rejected(reason)),
            SubmitStep::Fail(reason) => Ok(state.include(envelope, Some(reason))),
            SubmitStep::TransportError => Err(NetworkError::Transport("connection refused".to_string())),
        }
    }

    async fn get_account_sequence(&self, account_id: &str) -> Result<u64, NetworkError> {
        self.lock()
            .sequence_of(account_id)
            .ok_or_else(|| NetworkError::AccountNotFound(account_id.to_string()))
    }

    async fn get_transaction_status(&self, hash: &str) -> Result<ExternalTxStatus, NetworkError> {
        let mut state = self.lock();
        state.status_queries += 1;
        if let Some(status) = state.status_overrides.get(hash) {
            return Ok(*status);
        }
        Ok(match state.applied.get(hash) {
            Some(ledger) => ExternalTxStatus::Confirmed { ledger: *ledger },
            None => ExternalTxStatus::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stellar_xdr::curr::{Memo, Preconditions, SequenceNumber, Transaction, TransactionExt, VecM};

    use crate::builder::envelope::{muxed_account, transaction_hash};
    use crate::builder::strkey;

    fn envelope(source: [u8; 32], sequence: i64) -> SignedEnvelope {
        let tx = Transaction {
            source_account: muxed_account(&source),
            fee: 100,
            seq_num: SequenceNumber(sequence),
            cond: Preconditions::None,
            memo: Memo::None,
            operations: VecM::default(),
            ext: TransactionExt::V0,
        };
        let hash = transaction_hash("test", &tx).unwrap();
        SignedEnvelope::assemble(tx, hash, Vec::new()).unwrap()
    }

    #[tokio::test]
    async fn test_sequence_must_be_next() {
        let network = ScriptedNetwork::with_default_sequence(10);
        let account = strkey::encode_account_id(&[1u8; 32]);

        let wrong = envelope([1u8; 32], 12);
        assert_eq!(
            network.submit(&wrong).await.unwrap(),
            SubmitOutcome::Rejected(RejectionReason::BadSequence)
        );

        let right = envelope([1u8; 32], 11);
        assert!(matches!(network.submit(&right).await.unwrap(), SubmitOutcome::Accepted { .. }));
        assert_eq!(network.get_account_sequence(&account).await.unwrap(), 11);
        assert!(matches!(
            network.get_transaction_status(&right.hash).await.unwrap(),
            ExternalTxStatus::Confirmed { .. }
        ));
        assert_eq!(network.submit_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_timeout_may_apply() {
        let network = ScriptedNetwork::with_default_sequence(0);
        network.script([SubmitStep::Timeout { applied: true }, SubmitStep::Timeout { applied: false }]);

        let first = envelope([1u8; 32], 1);
        assert!(network.submit(&first).await.is_err());
        assert!(network.is_applied(&first.hash));

        let second = envelope([1u8; 32], 2);
        assert!(network.submit(&second).await.is_err());
        assert_eq!(
            network.get_transaction_status(&second.hash).await.unwrap(),
            ExternalTxStatus::NotFound
        );
    }

    #[tokio::test]
    async fn test_failed_step_consumes_sequence() {
        let network = ScriptedNetwork::with_default_sequence(5);
        let account = strkey::encode_account_id(&[1u8; 32]);
        network.script([
            SubmitStep::Fail(RejectionReason::InsufficientBalance),
            SubmitStep::Reject(RejectionReason::BadAuth),
        ]);

        let failed = envelope([1u8; 32], 6);
        assert_eq!(
            network.submit(&failed).await.unwrap(),
            SubmitOutcome::Failed(RejectionReason::InsufficientBalance)
        );
        assert_eq!(network.get_account_sequence(&account).await.unwrap(), 6);
        assert!(!network.is_applied(&failed.hash));
        assert!(matches!(
            network.get_transaction_status(&failed.hash).await.unwrap(),
            ExternalTxStatus::Failed { .. }
        ));

        let refused = envelope([1u8; 32], 7);
        assert!(matches!(network.submit(&refused).await.unwrap(), SubmitOutcome::Rejected(_)));
        assert_eq!(network.get_account_sequence(&account).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let network = ScriptedNetwork::new();
        assert_eq!(
            network.get_account_sequence("GNOPE").await,
            Err(NetworkError::AccountNotFound("GNOPE".into()))
        );

        let network = ScriptedNetwork::with_default_sequence(3);
        network.merge_account("GGONE");
        assert!(network.get_account_sequence("GGONE").await.is_err());
        assert_eq!(network.get_account_sequence("GHERE").await.unwrap(), 3);
    }
}
