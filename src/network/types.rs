//! External network result types.

use thiserror::Error;

/// Why the network refused a transaction.
///
/// Every variant except `BadSequence` is definitive: resubmitting the same
/// envelope cannot succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// Sequence number is not the account's next one.
    BadSequence,
    /// Missing or invalid signatures.
    BadAuth,
    /// Source cannot cover the amount or the fee.
    InsufficientBalance,
    InsufficientFee,
    /// Destination has no trustline for the asset.
    NoTrust,
    /// Envelope or operation is malformed.
    Malformed(String),
    /// Any other result code.
    Other(String),
}

impl RejectionReason {
    /// Map horizon `result_codes` to a rejection reason.
    pub fn from_result_codes(transaction: &str, operations: &[String]) -> Self {
        match transaction {
            "tx_bad_seq" => return RejectionReason::BadSequence,
            "tx_bad_auth" | "tx_bad_auth_extra" => return RejectionReason::BadAuth,
            "tx_insufficient_balance" => return RejectionReason::InsufficientBalance,
            "tx_insufficient_fee" => return RejectionReason::InsufficientFee,
            "tx_malformed" => return RejectionReason::Malformed(transaction.to_string()),
            _ => {}
        }
        let failing = operations.iter().find(|code| code.as_str() != "op_success");
        match failing.map(String::as_str) {
            Some("op_underfunded") | Some("op_low_reserve") => RejectionReason::InsufficientBalance,
            Some("op_no_trust") | Some("op_not_authorized") | Some("op_src_no_trust") => RejectionReason::NoTrust,
            Some("op_bad_auth") => RejectionReason::BadAuth,
            Some(code @ "op_malformed") => RejectionReason::Malformed(code.to_string()),
            Some(code) => RejectionReason::Other(format!("{}/{}", transaction, code)),
            None => RejectionReason::Other(transaction.to_string()),
        }
    }

    pub fn is_sequence_conflict(&self) -> bool {
        matches!(self, RejectionReason::BadSequence)
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::BadSequence => f.write_str("tx_bad_seq"),
            RejectionReason::BadAuth => f.write_str("tx_bad_auth"),
            RejectionReason::InsufficientBalance => f.write_str("insufficient balance"),
            RejectionReason::InsufficientFee => f.write_str("tx_insufficient_fee"),
            RejectionReason::NoTrust => f.write_str("no trustline"),
            RejectionReason::Malformed(code) => write!(f, "malformed ({})", code),
            RejectionReason::Other(code) => f.write_str(code),
        }
    }
}

/// Result of a submission the network answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Included in `ledger`.
    Accepted { hash: String, ledger: u64 },
    /// Refused before inclusion; the sequence number is still free.
    Rejected(RejectionReason),
    /// Included but an operation failed (`tx_failed`); the sequence number
    /// and the fee were consumed.
    Failed(RejectionReason),
}

impl SubmitOutcome {
    /// Map a horizon error response to an outcome.
    pub fn from_result_codes(transaction: &str, operations: &[String]) -> Self {
        let reason = RejectionReason::from_result_codes(transaction, operations);
        if transaction == "tx_failed" {
            SubmitOutcome::Failed(reason)
        } else {
            SubmitOutcome::Rejected(reason)
        }
    }
}

/// What the network knows about a transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalTxStatus {
    /// Included and successful.
    Confirmed { ledger: u64 },
    /// Included but failed; the sequence number was consumed.
    Failed { ledger: u64 },
    /// Known but not yet in a ledger.
    Pending,
    NotFound,
}

/// Transport-level failures. For a submission these leave the outcome unknown.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    /// The configured endpoint is unusable; nothing was sent.
    #[error("network configuration: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_mapping() {
        assert_eq!(RejectionReason::from_result_codes("tx_bad_seq", &[]), RejectionReason::BadSequence);
        assert!(RejectionReason::from_result_codes("tx_bad_seq", &[]).is_sequence_conflict());
        assert_eq!(
            RejectionReason::from_result_codes("tx_failed", &["op_underfunded".to_string()]),
            RejectionReason::InsufficientBalance
        );
        assert_eq!(
            RejectionReason::from_result_codes("tx_failed", &["op_success".into(), "op_no_trust".into()]),
            RejectionReason::NoTrust
        );
        assert_eq!(
            RejectionReason::from_result_codes("tx_too_late", &[]),
            RejectionReason::Other("tx_too_late".into())
        );
    }

    #[test]
    fn test_only_tx_failed_consumes_the_sequence() {
        assert_eq!(
            SubmitOutcome::from_result_codes("tx_failed", &["op_underfunded".to_string()]),
            SubmitOutcome::Failed(RejectionReason::InsufficientBalance)
        );
        assert_eq!(
            SubmitOutcome::from_result_codes("tx_insufficient_balance", &[]),
            SubmitOutcome::Rejected(RejectionReason::InsufficientBalance)
        );
        assert_eq!(
            SubmitOutcome::from_result_codes("tx_bad_auth", &[]),
            SubmitOutcome::Rejected(RejectionReason::BadAuth)
        );
    }
}
