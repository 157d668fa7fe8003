//! Pending transaction record and its state machine.
//!
//! ```text
//! BUILT ──submit──▶ SUBMITTED ──accepted──▶ CONFIRMED
//!   ▲                   │
//!   │ sequence refresh  ├──rejected──▶ FAILED
//!   └───────────────────┤
//!                       └──retry budget spent──▶ ABANDONED
//! ```
//!
//! CONFIRMED, FAILED and ABANDONED are terminal.

use serde::{Deserialize, Serialize};

use crate::builder::SignedEnvelope;
use crate::events::{Direction, LedgerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Built,
    Submitted,
    Confirmed,
    Failed,
    Abandoned,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Failed | TxStatus::Abandoned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Built => "BUILT",
            TxStatus::Submitted => "SUBMITTED",
            TxStatus::Confirmed => "CONFIRMED",
            TxStatus::Failed => "FAILED",
            TxStatus::Abandoned => "ABANDONED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    InvalidEvent,
    Signing,
    Rejected,
    SequenceConflict,
    Transient,
    Irrecoverable,
}

/// Why the last attempt did not confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub reason: String,
    pub retryable: bool,
}

impl FailureReason {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        let retryable = matches!(kind, FailureKind::SequenceConflict | FailureKind::Transient);
        Self {
            kind,
            reason: reason.into(),
            retryable,
        }
    }
}

/// One outbound transaction mirroring one ledger event.
///
/// Keyed by `internal_event_id`; at most one record exists per event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub internal_event_id: String,
    pub internal_account_id: String,
    pub external_account_id: String,
    pub direction: Direction,
    pub asset: String,
    pub amount: i64,
    /// Sequence number carried by the envelope.
    pub sequence_number_used: u64,
    /// Absent only when the event failed before an envelope existed.
    pub signed_envelope: Option<SignedEnvelope>,
    pub tx_hash: Option<String>,
    pub status: TxStatus,
    pub attempt_count: u32,
    /// Unix milliseconds of the last submission attempt.
    pub last_attempt_at: Option<u64>,
    /// Configuration version the envelope was built under.
    pub config_version: u64,
    pub failure: Option<FailureReason>,
}

impl PendingTransaction {
    /// Reconstruct the ledger event this record mirrors.
    pub fn event(&self) -> LedgerEvent {
        LedgerEvent {
            event_id: self.internal_event_id.clone(),
            internal_account_id: self.internal_account_id.clone(),
            amount: self.amount,
            asset: self.asset.clone(),
            direction: self.direction,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
