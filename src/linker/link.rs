//! Account link record.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustlineStatus {
    None,
    Pending,
    Established,
}

/// Durable mapping between an internal ledger account and its external account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLink {
    pub internal_account_id: String,
    pub external_account_id: String,
    /// Sequence of the last confirmed transaction. Only ever increases.
    pub last_known_sequence: u64,
    pub trustline_status: TrustlineStatus,
    /// Change-trust transaction hash while the trustline is pending.
    #[serde(default)]
    pub trustline_tx_hash: Option<String>,
    /// Event ids of transactions not yet terminal.
    #[serde(default)]
    pub pending_event_ids: BTreeSet<String>,
    /// Set when the account needs manual reconciliation.
    #[serde(default)]
    pub quarantined: bool,
}

impl AccountLink {
    pub fn new(internal_account_id: impl Into<String>, external_account_id: impl Into<String>, sequence: u64) -> Self {
        Self {
            internal_account_id: internal_account_id.into(),
            external_account_id: external_account_id.into(),
            last_known_sequence: sequence,
            trustline_status: TrustlineStatus::None,
            trustline_tx_hash: None,
            pending_event_ids: BTreeSet::new(),
            quarantined: false,
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_event_ids.is_empty()
    }
}
