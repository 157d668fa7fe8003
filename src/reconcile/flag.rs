//! Manual-review flags raised by the reconciliation listener.

use serde::{Deserialize, Serialize};

use crate::clock::unix_millis;

/// The network shows activity on an account that the bridge did not record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationFlag {
    pub external_account_id: String,
    /// Sequence reported by the network.
    pub observed_sequence: u64,
    /// Sequence recorded on the link.
    pub recorded_sequence: u64,
    pub detail: String,
    /// Unix milliseconds.
    pub raised_at: u64,
}

impl ReconciliationFlag {
    pub fn sequence_ahead(external_account_id: &str, observed_sequence: u64, recorded_sequence: u64) -> Self {
        Self {
            external_account_id: external_account_id.to_string(),
            observed_sequence,
            recorded_sequence,
            detail: format!(
                "network sequence {} is ahead of recorded sequence {} with no transaction in flight",
                observed_sequence, recorded_sequence
            ),
            raised_at: unix_millis(),
        }
    }
}
