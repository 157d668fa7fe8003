//! Payment and trustline transaction construction.
//!
//! # Responsibilities
//! - Validate a ledger event against the configuration snapshot
//! - Build the unsigned body deterministically from (event, sequence, snapshot)
//! - Sign with the funding key and wrap the envelope in a `PendingTransaction`
//! - Build change-trust transactions for new links
//!
//! # Design Decisions
//! - The linked account is the transaction source; its sequence is consumed
//! - Deposits pay from the funding account via an operation-level source
//! - The memo is the sha256 of the event id, tying the chain transaction to
//!   its idempotency key
//! - No I/O; the caller supplies the sequence

use std::sync::Arc;

use sha2::{Digest, Sha256};

use stellar_xdr::curr::{
    Asset, ChangeTrustOp, Hash, Memo, Operation, OperationBody, PaymentOp, Preconditions, SequenceNumber,
    Transaction, TransactionExt,
};

use crate::builder::envelope::{
    credit_asset, encoding, muxed_account, transaction_hash, trust_asset, PublicKeyBytes, SignedEnvelope,
};
use crate::builder::signer::FundingSigner;
use crate::builder::strkey;
use crate::config::VersionedConfiguration;
use crate::engine::{PendingTransaction, TxStatus};
use crate::error::{BridgeError, BridgeResult, BuildError, ConfigurationError};
use crate::events::{Direction, LedgerEvent};
use crate::linker::AccountLink;

/// Trust limit used for every change-trust operation.
pub const TRUSTLINE_LIMIT: i64 = i64::MAX;

/// Builds and signs external transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    signer: Option<Arc<FundingSigner>>,
}

impl TransactionBuilder {
    pub fn new(signer: Option<Arc<FundingSigner>>) -> Self {
        Self { signer }
    }

    /// Builder with the signer from `BRIDGE_FUNDING_SECRET`, or none when unset.
    ///
    /// A missing signer is not fatal here; every build then fails with a
    /// signing error, which halts the service until a signer is available.
    pub fn from_env() -> Self {
        match FundingSigner::from_env() {
            Ok(signer) => Self::new(Some(Arc::new(signer))),
            Err(e) => {
                tracing::warn!(error = %e, "No funding signer loaded");
                Self::new(None)
            }
        }
    }

    /// Public account id of the loaded signer.
    pub fn signer_account(&self) -> Option<&str> {
        self.signer.as_deref().map(FundingSigner::account_id)
    }

    /// Build the next transaction for `link`, using `last_known_sequence + 1`.
    pub fn build(
        &self,
        event: &LedgerEvent,
        link: &AccountLink,
        snapshot: &VersionedConfiguration,
    ) -> BridgeResult<PendingTransaction> {
        self.build_with_sequence(event, link, link.last_known_sequence + 1, snapshot)
    }

    /// Build with an explicitly reserved sequence number.
    pub fn build_with_sequence(
        &self,
        event: &LedgerEvent,
        link: &AccountLink,
        sequence: u64,
        snapshot: &VersionedConfiguration,
    ) -> BridgeResult<PendingTransaction> {
        let body = self.unsigned_body(event, link, sequence, snapshot)?;
        let envelope = self.sign(body, snapshot)?;

        tracing::debug!(
            event_id = %event.event_id,
            account = %link.external_account_id,
            sequence = sequence,
            tx_hash = %envelope.hash,
            config_version = snapshot.version,
            "Built payment transaction"
        );

        Ok(PendingTransaction {
            internal_event_id: event.event_id.clone(),
            internal_account_id: event.internal_account_id.clone(),
            external_account_id: link.external_account_id.clone(),
            direction: event.direction,
            asset: event.asset.clone(),
            amount: event.amount,
            sequence_number_used: sequence,
            tx_hash: Some(envelope.hash.clone()),
            signed_envelope: Some(envelope),
            status: TxStatus::Built,
            attempt_count: 0,
            last_attempt_at: None,
            config_version: snapshot.version,
            failure: None,
        })
    }

    /// The unsigned payment body. Identical inputs give an identical body.
    pub fn unsigned_body(
        &self,
        event: &LedgerEvent,
        link: &AccountLink,
        sequence: u64,
        snapshot: &VersionedConfiguration,
    ) -> BridgeResult<Transaction> {
        validate_event(event, link, snapshot)?;

        let funding = funding_key(snapshot)?;
        let linked = linked_key(link)?;
        let asset = resolve_asset(&event.asset, snapshot)?;

        let (op_source, destination) = match event.direction {
            Direction::Deposit => (Some(muxed_account(&funding)), linked),
            Direction::Withdrawal => (None, funding),
        };

        let operations = vec![Operation {
            source_account: op_source,
            body: OperationBody::Payment(PaymentOp {
                destination: muxed_account(&destination),
                asset,
                amount: event.amount,
            }),
        }];

        Ok(Transaction {
            source_account: muxed_account(&linked),
            fee: snapshot.base_fee,
            seq_num: SequenceNumber(sequence_to_i64(sequence)?),
            cond: Preconditions::None,
            memo: Memo::Hash(Hash(Sha256::digest(event.event_id.as_bytes()).into())),
            operations: operations.try_into().map_err(encoding)?,
            ext: TransactionExt::V0,
        })
    }

    /// Change-trust transaction for every configured asset.
    ///
    /// The funding account is the transaction source and pays the fee; the
    /// linked account is the operation source.
    pub fn build_trustline(
        &self,
        link: &AccountLink,
        funding_sequence: u64,
        snapshot: &VersionedConfiguration,
    ) -> BridgeResult<SignedEnvelope> {
        let funding = funding_key(snapshot)?;
        let linked = linked_key(link)?;

        let operations = snapshot
            .assets
            .keys()
            .map(|code| {
                Ok(Operation {
                    source_account: Some(muxed_account(&linked)),
                    body: OperationBody::ChangeTrust(ChangeTrustOp {
                        line: trust_asset(resolve_asset(code, snapshot)?),
                        limit: TRUSTLINE_LIMIT,
                    }),
                })
            })
            .collect::<BridgeResult<Vec<_>>>()?;

        let fee = snapshot.base_fee.saturating_mul(operations.len().max(1) as u32);
        let tx = Transaction {
            source_account: muxed_account(&funding),
            fee,
            seq_num: SequenceNumber(sequence_to_i64(funding_sequence)?),
            cond: Preconditions::None,
            memo: Memo::None,
            operations: operations.try_into().map_err(encoding)?,
            ext: TransactionExt::V0,
        };
        self.sign(tx, snapshot)
    }

    fn sign(&self, tx: Transaction, snapshot: &VersionedConfiguration) -> BridgeResult<SignedEnvelope> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ConfigurationError::Signing("no funding signer loaded".to_string()))?;
        if signer.account_id() != snapshot.funding_account_identity {
            return Err(ConfigurationError::Signing(format!(
                "loaded signer {} does not match funding account {}",
                signer.account_id(),
                snapshot.funding_account_identity
            ))
            .into());
        }

        let hash = transaction_hash(&snapshot.network_passphrase, &tx)?;
        let signature = signer.sign(&hash)?;
        Ok(SignedEnvelope::assemble(tx, hash, vec![signature])?)
    }
}

fn validate_event(event: &LedgerEvent, link: &AccountLink, snapshot: &VersionedConfiguration) -> BridgeResult<()> {
    let invalid = |reason: String| -> BridgeError {
        BuildError::InvalidEvent {
            event_id: event.event_id.clone(),
            reason,
        }
        .into()
    };

    if event.event_id.trim().is_empty() {
        return Err(invalid("empty event id".to_string()));
    }
    if event.internal_account_id.trim().is_empty() {
        return Err(invalid("empty internal account id".to_string()));
    }
    if event.internal_account_id != link.internal_account_id {
        return Err(invalid(format!(
            "event account {} does not match link {}",
            event.internal_account_id, link.internal_account_id
        )));
    }
    if event.amount <= 0 {
        return Err(invalid(format!("amount must be positive, got {}", event.amount)));
    }
    if !snapshot.assets.contains_key(&event.asset) {
        return Err(invalid(format!("asset {} is not configured", event.asset)));
    }
    Ok(())
}

fn funding_key(snapshot: &VersionedConfiguration) -> BridgeResult<PublicKeyBytes> {
    strkey::decode_account_id(&snapshot.funding_account_identity)
        .map_err(|e| ConfigurationError::Invalid(format!("funding account: {}", e)).into())
}

fn linked_key(link: &AccountLink) -> BridgeResult<PublicKeyBytes> {
    strkey::decode_account_id(&link.external_account_id)
        .map_err(|e| BridgeError::linking(&link.internal_account_id, format!("external account id: {}", e)))
}

fn resolve_asset(code: &str, snapshot: &VersionedConfiguration) -> BridgeResult<Asset> {
    let issuer = snapshot
        .assets
        .get(code)
        .ok_or_else(|| ConfigurationError::Invalid(format!("asset {} is not configured", code)))?;
    let issuer = strkey::decode_account_id(issuer)
        .map_err(|e| ConfigurationError::Invalid(format!("issuer of {}: {}", code, e)))?;
    credit_asset(code, &issuer).map_err(|e| ConfigurationError::Invalid(e.to_string()).into())
}

fn sequence_to_i64(sequence: u64) -> BridgeResult<i64> {
    i64::try_from(sequence).map_err(|_| BuildError::Encoding(format!("sequence {} out of range", sequence)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stellar_xdr::curr::{Limits, MuxedAccount, Uint256, WriteXdr};

    use crate::config::BridgeConfiguration;

    fn signer() -> Arc<FundingSigner> {
        Arc::new(FundingSigner::from_seed(&[1u8; 32]))
    }

    fn snapshot(signer: &FundingSigner) -> VersionedConfiguration {
        let issuer = strkey::encode_account_id(&[9u8; 32]);
        VersionedConfiguration {
            version: 1,
            configuration: BridgeConfiguration::new(signer.account_id(), "https://horizon.example")
                .with_asset("USD", issuer),
            updated_by: "system".into(),
            updated_at: 0,
        }
    }

    fn link() -> AccountLink {
        AccountLink::new("A1", strkey::encode_account_id(&[2u8; 32]), 100)
    }

    fn event(direction: Direction) -> LedgerEvent {
        LedgerEvent {
            event_id: "e1".into(),
            internal_account_id: "A1".into(),
            amount: 100,
            asset: "USD".into(),
            direction,
        }
    }

    #[test]
    fn test_build_uses_next_sequence() {
        let signer = signer();
        let builder = TransactionBuilder::new(Some(signer.clone()));
        let tx = builder.build(&event(Direction::Deposit), &link(), &snapshot(&signer)).unwrap();

        assert_eq!(tx.sequence_number_used, 101);
        assert_eq!(tx.status, TxStatus::Built);
        assert_eq!(tx.config_version, 1);
        let envelope = tx.signed_envelope.unwrap();
        assert_eq!(
            envelope.source_and_sequence(),
            Some((link().external_account_id, 101))
        );
        assert_eq!(tx.tx_hash, Some(envelope.hash));
    }

    #[test]
    fn test_build_is_deterministic() {
        let signer = signer();
        let builder = TransactionBuilder::new(Some(signer.clone()));
        let snap = snapshot(&signer);
        let a = builder.build(&event(Direction::Deposit), &link(), &snap).unwrap();
        let b = builder.build(&event(Direction::Deposit), &link(), &snap).unwrap();
        assert_eq!(a.signed_envelope, b.signed_envelope);

        let body_a = builder.unsigned_body(&event(Direction::Deposit), &link(), 101, &snap).unwrap();
        let body_b = builder.unsigned_body(&event(Direction::Deposit), &link(), 101, &snap).unwrap();
        assert_eq!(
            body_a.to_xdr(Limits::none()).unwrap(),
            body_b.to_xdr(Limits::none()).unwrap()
        );
    }

    #[test]
    fn test_direction_sets_destination() {
        let signer = signer();
        let builder = TransactionBuilder::new(Some(signer.clone()));
        let snap = snapshot(&signer);

        let deposit = builder.unsigned_body(&event(Direction::Deposit), &link(), 101, &snap).unwrap();
        match &deposit.operations[0].body {
            OperationBody::Payment(op) => assert_eq!(op.destination, MuxedAccount::Ed25519(Uint256([2u8; 32]))),
            other => panic!("unexpected operation {:?}", other),
        }
        assert_eq!(deposit.operations[0].source_account, Some(muxed_account(&signer.public_key())));

        let withdrawal = builder.unsigned_body(&event(Direction::Withdrawal), &link(), 101, &snap).unwrap();
        match &withdrawal.operations[0].body {
            OperationBody::Payment(op) => assert_eq!(op.destination, muxed_account(&signer.public_key())),
            other => panic!("unexpected operation {:?}", other),
        }
        assert_eq!(withdrawal.operations[0].source_account, None);
    }

    #[test]
    fn test_invalid_events() {
        let signer = signer();
        let builder = TransactionBuilder::new(Some(signer.clone()));
        let snap = snapshot(&signer);

        let mut bad_asset = event(Direction::Deposit);
        bad_asset.asset = "EUR".into();
        let mut bad_amount = event(Direction::Deposit);
        bad_amount.amount = 0;
        let mut bad_id = event(Direction::Deposit);
        bad_id.event_id = " ".into();

        for e in [bad_asset, bad_amount, bad_id] {
            assert!(matches!(
                builder.build(&e, &link(), &snap),
                Err(BridgeError::Build(BuildError::InvalidEvent { .. }))
            ));
        }
    }

    #[test]
    fn test_missing_or_mismatched_signer() {
        let signer = signer();
        let snap = snapshot(&signer);

        let unsigned = TransactionBuilder::new(None);
        assert!(matches!(
            unsigned.build(&event(Direction::Deposit), &link(), &snap),
            Err(BridgeError::Configuration(ConfigurationError::Signing(_)))
        ));

        let other = TransactionBuilder::new(Some(Arc::new(FundingSigner::from_seed(&[3u8; 32]))));
        assert!(matches!(
            other.build(&event(Direction::Deposit), &link(), &snap),
            Err(BridgeError::Configuration(ConfigurationError::Signing(_)))
        ));
    }

    #[test]
    fn test_trustline_has_one_op_per_asset() {
        let signer = signer();
        let builder = TransactionBuilder::new(Some(signer.clone()));
        let mut snap = snapshot(&signer);
        snap.configuration = snap
            .configuration
            .clone()
            .with_asset("EURCENT", strkey::encode_account_id(&[8u8; 32]));

        let envelope = builder.build_trustline(&link(), 7, &snap).unwrap();
        let (source, sequence) = envelope.source_and_sequence().unwrap();
        assert_eq!(source, signer.account_id());
        assert_eq!(sequence, 7);

        let tx = envelope.transaction().unwrap();
        assert_eq!(tx.operations.len(), 2);
        assert_eq!(tx.fee, 200);
        assert!(tx
            .operations
            .iter()
            .all(|op| matches!(op.body, OperationBody::ChangeTrust(_))
                && op.source_account == Some(MuxedAccount::Ed25519(Uint256([2u8; 32])))));
    }

    #[test]
    fn test_unusable_asset_code_is_a_configuration_error() {
        let signer = signer();
        let builder = TransactionBuilder::new(Some(signer.clone()));
        let mut snap = snapshot(&signer);
        let code = "THIRTEENCHARS";
        snap.configuration = snap
            .configuration
            .clone()
            .with_asset(code, strkey::encode_account_id(&[8u8; 32]));
        let mut e = event(Direction::Deposit);
        e.asset = code.into();

        let err = builder.build(&e, &link(), &snap).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(ConfigurationError::Invalid(_))));
        assert_eq!(err.scope(), crate::error::ErrorScope::Halt);
    }
}
