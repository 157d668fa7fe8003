//! Transaction envelope assembly on top of `stellar-xdr`.
//!
//! The bridge emits V1 envelopes with an ed25519 source account, no
//! preconditions, an optional hash memo and PAYMENT / CHANGE_TRUST
//! operations. Everything here is pure; values are converted into XDR types
//! and the canonical encoding comes from the XDR crate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stellar_xdr::curr::{
    AccountId, AlphaNum12, AlphaNum4, Asset, AssetCode12, AssetCode4, ChangeTrustAsset, DecoratedSignature, Hash,
    Limits, MuxedAccount, PublicKey, ReadXdr, Transaction, TransactionEnvelope, TransactionSignaturePayload,
    TransactionSignaturePayloadTaggedTransaction, TransactionV1Envelope, Uint256, WriteXdr,
};

use crate::builder::strkey;
use crate::error::BuildError;

/// Raw ed25519 public key.
pub type PublicKeyBytes = [u8; 32];

pub fn muxed_account(key: &PublicKeyBytes) -> MuxedAccount {
    MuxedAccount::Ed25519(Uint256(*key))
}

pub fn account_id(key: &PublicKeyBytes) -> AccountId {
    AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(*key)))
}

/// Issued asset for `code`; 1-4 characters use the short form, 5-12 the long one.
pub fn credit_asset(code: &str, issuer: &PublicKeyBytes) -> Result<Asset, BuildError> {
    if code.is_empty() || code.len() > 12 || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(BuildError::Encoding(format!("asset code '{}' must be 1-12 alphanumerics", code)));
    }
    let issuer = account_id(issuer);
    if code.len() <= 4 {
        let mut padded = [0u8; 4];
        padded[..code.len()].copy_from_slice(code.as_bytes());
        Ok(Asset::CreditAlphanum4(AlphaNum4 {
            asset_code: AssetCode4(padded),
            issuer,
        }))
    } else {
        let mut padded = [0u8; 12];
        padded[..code.len()].copy_from_slice(code.as_bytes());
        Ok(Asset::CreditAlphanum12(AlphaNum12 {
            asset_code: AssetCode12(padded),
            issuer,
        }))
    }
}

/// The trust line form of an asset.
pub fn trust_asset(asset: Asset) -> ChangeTrustAsset {
    match asset {
        Asset::Native => ChangeTrustAsset::Native,
        Asset::CreditAlphanum4(a) => ChangeTrustAsset::CreditAlphanum4(a),
        Asset::CreditAlphanum12(a) => ChangeTrustAsset::CreditAlphanum12(a),
    }
}

/// sha256 of the network passphrase.
pub fn network_id(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

/// Hash that is signed and that identifies the transaction on the network:
/// sha256(network id ‖ ENVELOPE_TYPE_TX ‖ transaction).
pub fn transaction_hash(passphrase: &str, tx: &Transaction) -> Result<[u8; 32], BuildError> {
    let payload = TransactionSignaturePayload {
        network_id: Hash(network_id(passphrase)),
        tagged_transaction: TransactionSignaturePayloadTaggedTransaction::Tx(tx.clone()),
    };
    let bytes = payload.to_xdr(Limits::none()).map_err(encoding)?;
    Ok(Sha256::digest(bytes).into())
}

pub(crate) fn encoding(e: stellar_xdr::curr::Error) -> BuildError {
    BuildError::Encoding(e.to_string())
}

/// A signed, network-ready transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// Base64 envelope XDR.
    pub xdr: String,
    /// Hex transaction hash.
    pub hash: String,
}

impl SignedEnvelope {
    pub fn assemble(tx: Transaction, hash: [u8; 32], signatures: Vec<DecoratedSignature>) -> Result<Self, BuildError> {
        let envelope = TransactionEnvelope::Tx(TransactionV1Envelope {
            tx,
            signatures: signatures.try_into().map_err(encoding)?,
        });
        Ok(Self {
            xdr: envelope.to_xdr_base64(Limits::none()).map_err(encoding)?,
            hash: hex::encode(hash),
        })
    }

    /// The decoded transaction, when this is a V1 envelope.
    pub fn transaction(&self) -> Option<Transaction> {
        match TransactionEnvelope::from_xdr_base64(&self.xdr, Limits::none()).ok()? {
            TransactionEnvelope::Tx(v1) => Some(v1.tx),
            _ => None,
        }
    }

    /// Source account id and sequence number.
    pub fn source_and_sequence(&self) -> Option<(String, u64)> {
        let tx = self.transaction()?;
        let source = match tx.source_account {
            MuxedAccount::Ed25519(Uint256(key)) => strkey::encode_account_id(&key),
            MuxedAccount::MuxedEd25519(_) => return None,
        };
        Some((source, u64::try_from(tx.seq_num.0).ok()?))
    }
}
