//! The external network as seen by the bridge.

use async_trait::async_trait;

use crate::builder::SignedEnvelope;
use crate::network::types::{ExternalTxStatus, NetworkError, SubmitOutcome};

/// Horizon-style access to the external ledger.
///
/// `Err` from `submit` means the outcome is unknown: the envelope may or may
/// not have been applied. Callers resolve that with `get_transaction_status`.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn submit(&self, envelope: &SignedEnvelope) -> Result<SubmitOutcome, NetworkError>;

    /// Current sequence number of an account.
    async fn get_account_sequence(&self, account_id: &str) -> Result<u64, NetworkError>;

    async fn get_transaction_status(&self, hash: &str) -> Result<ExternalTxStatus, NetworkError>;
}
